//! Binary media resolution for podcast feeds: enclosure download/probe and
//! cover-image fetch/validate/resize, both following the same
//! cache-then-fetch-then-persist pattern as article resolution.

mod enclosure;
mod image;
mod store;

pub use enclosure::ResolvedEnclosure;
pub use image::{prepare_image, ImagePrepError};
pub use store::{extension_for_mime, MediaStore, MediaTools};

use std::sync::Arc;

use crate::fetch::ContentFetcher;
use crate::storage::Database;

/// Cache-or-fetch orchestrator for enclosures and images.
///
/// Mirrors [`crate::content::ContentResolver`] but for binary payloads: the
/// cache row is the index, the media-store file is the payload.
pub struct PodcastResolver {
    pub(crate) db: Database,
    pub(crate) store: MediaStore,
    pub(crate) fetcher: Arc<ContentFetcher>,
    pub(crate) tools: MediaTools,
}

impl PodcastResolver {
    pub fn new(
        db: Database,
        store: MediaStore,
        fetcher: Arc<ContentFetcher>,
        tools: MediaTools,
    ) -> Self {
        Self {
            db,
            store,
            fetcher,
            tools,
        }
    }
}

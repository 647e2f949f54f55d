//! Feed descriptors, per-feed hook contracts, and output assembly.

mod assembler;
mod descriptor;
mod rss;

pub use assembler::{AssembleError, FeedAssembler};
pub use descriptor::{
    DescriptorError, EnclosureFallbackDownloader, FeedDescriptor, HookRegistry, Hooks,
    ItemTransform, JsonItemTransform, JsonItemsEnumerator, PodcastImageResolver,
    PodcastItemImageResolver, PointerItemsEnumerator, SourceContext, SourceKind,
    DEFAULT_RETENTION_SECS,
};
pub use rss::{RssChannel, RssEnclosure, RssItem};

use std::io::Cursor;

use image::{imageops::FilterType, ImageFormat};
use thiserror::Error;

use super::PodcastResolver;
use crate::storage::ImageKind;

/// Acceptable side-length range for podcast cover art. Images outside the
/// range are resized to the nearest bound.
const MIN_SIDE: u32 = 1400;
const MAX_SIDE: u32 = 3000;

#[derive(Debug, Error)]
pub enum ImagePrepError {
    #[error("Unsupported image type (PNG or JPEG required)")]
    UnsupportedType,

    #[error("Image is not square: {width}x{height}")]
    NotSquare { width: u32, height: u32 },

    #[error("Image could not be decoded: {0}")]
    Decode(String),
}

/// Validate raw image bytes and normalize dimensions.
///
/// Returns the bytes to store plus their file extension. Only square PNG or
/// JPEG is accepted; sides outside [`MIN_SIDE`]..=[`MAX_SIDE`] are resized to
/// the nearest bound with square resampling. If re-encoding somehow yields an
/// empty buffer, the original bytes are kept.
pub fn prepare_image(bytes: &[u8]) -> Result<(Vec<u8>, &'static str), ImagePrepError> {
    let format = image::guess_format(bytes).map_err(|_| ImagePrepError::UnsupportedType)?;
    let ext = match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        _ => return Err(ImagePrepError::UnsupportedType),
    };

    let img = image::load_from_memory(bytes).map_err(|e| ImagePrepError::Decode(e.to_string()))?;
    let (width, height) = (img.width(), img.height());
    if width != height {
        return Err(ImagePrepError::NotSquare { width, height });
    }

    if (MIN_SIDE..=MAX_SIDE).contains(&width) {
        return Ok((bytes.to_vec(), ext));
    }

    let side = width.clamp(MIN_SIDE, MAX_SIDE);
    let resized = img.resize_exact(side, side, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    if resized.write_to(&mut out, format).is_err() || out.get_ref().is_empty() {
        // Resize produced nothing usable; the original is better than nothing.
        tracing::warn!(side = side, "Image resize produced empty output, keeping original bytes");
        return Ok((bytes.to_vec(), ext));
    }

    Ok((out.into_inner(), ext))
}

impl PodcastResolver {
    /// Resolve a cover image to its public URL, or `""` on any failure.
    ///
    /// Cache rows are self-healing: a hit whose backing file has vanished is
    /// deleted and re-resolved. Every failure path (unreachable URL,
    /// unsupported type, non-square) logs and yields the empty string; the
    /// item simply lacks an image and feed assembly continues.
    pub async fn resolve_image(
        &self,
        feed: &str,
        kind: ImageKind,
        id: &str,
        source_url: &str,
    ) -> String {
        match self.db.get_image(feed, kind, id).await {
            Ok(Some(entry)) => {
                if self.store.exists(&entry.file) {
                    return self.store.public_url(&entry.file);
                }
                tracing::info!(feed = %feed, file = %entry.file, "Image file missing, healing stale cache row");
                if let Err(e) = self.db.delete_image(feed, kind, id).await {
                    tracing::warn!(feed = %feed, error = %e, "Failed to delete stale image row");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(feed = %feed, error = %e, "Image cache unavailable, forcing fetch");
            }
        }

        if source_url.is_empty() {
            return String::new();
        }

        let outcome = self.fetcher.fetch(source_url).await;
        if !outcome.is_ok() {
            tracing::warn!(feed = %feed, url = %source_url, status = outcome.status, "Image fetch failed");
            return String::new();
        }

        let (bytes, ext) = match prepare_image(&outcome.body) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(feed = %feed, url = %source_url, error = %e, "Image rejected");
                return String::new();
            }
        };

        let file = format!("{}.{ext}", self.store.unique_name(feed, &format!("{}:{id}", kind.as_str())));
        if let Err(e) = tokio::fs::write(self.store.path_for(&file), &bytes).await {
            tracing::warn!(feed = %feed, file = %file, error = %e, "Failed to write image file");
            return String::new();
        }

        if let Err(e) = self.db.put_image(feed, kind, id, &file).await {
            tracing::warn!(feed = %feed, error = %e, "Failed to persist image row");
        }

        self.store.public_url(&file)
    }
}

//! Content resolution: the cache-or-fetch-extract-normalize pipeline that
//! turns an item URL plus fallback fields into canonical title/content/time.

mod extractor;
mod normalize;
mod resolver;

pub use extractor::{Extracted, ExtractError, ReadabilityExtractor, SelectorExtractor};
pub use normalize::{decode_body, normalize_text};
pub use resolver::{
    ContentResolver, ItemFields, Resolved, ResolveStatus, MARK_ACCESS_DENIED, MARK_FETCH_FAILED,
};

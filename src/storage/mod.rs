mod articles;
mod db;
mod enclosures;
mod images;
pub mod janitor;

pub use articles::ArticleEntry;
pub use db::{Database, DatabaseError};
pub use enclosures::EnclosureEntry;
pub use images::{ImageEntry, ImageKind};
pub use janitor::{JanitorFeedReport, JanitorReport};

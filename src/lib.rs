//! refeed is a feed proxy that turns pages, feeds, and JSON APIs into
//! normalized RSS with cached, readability-extracted article content.
//!
//! The pipeline: a [`feed::FeedAssembler`] enumerates a source's items and,
//! for each item, asks the [`content::ContentResolver`] for the canonical
//! title/content/time. The resolver consults the SQLite-backed
//! [`storage::Database`] first and only on a miss fetches the page through
//! the [`fetch::ContentFetcher`], runs the readability extractor and the
//! feed's transform hooks, normalizes the result, and persists it. Podcast
//! feeds route enclosures and cover images through the analogous
//! [`media::PodcastResolver`]. The [`storage::janitor`] batch-evicts rows
//! (and their backing media files) past each feed's retention.

pub mod config;
pub mod content;
pub mod feed;
pub mod fetch;
pub mod media;
pub mod storage;

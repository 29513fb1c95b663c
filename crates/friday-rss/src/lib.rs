//! Friday RSS
//!
//! Feed fetching, deduplicating ingestion and subscriber notification

pub mod check;
pub mod fetcher;
pub mod ingest;
pub mod notify;
pub mod parser;

pub use check::{CheckSummary, FeedCheck};
pub use fetcher::{FeedFetcher, FetchError, HttpFeedFetcher};
pub use ingest::{FeedIngestor, IngestError};
pub use notify::{escape_markdown, format_article_message, FanoutReport, Notifier};
pub use parser::{parse_feed, FeedItem, ParsedFeed};

//! Friday Storage
//!
//! SQLite persistence for subscribers, feeds and articles

mod feeds;
mod users;

pub use feeds::{Article, Feed, FeedMetadata, FeedRepository, NewArticle};
pub use users::{NewUser, User, UserStore, UserUpdate};

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub type SharedStorage = Arc<Mutex<Storage>>;
pub type SharedFeedRepository = Arc<Mutex<dyn FeedRepository>>;
pub type SharedUserStore = Arc<Mutex<dyn UserStore>>;

pub struct Storage {
    conn: rusqlite::Connection,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path.as_ref())?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(rusqlite::Connection::open_in_memory()?)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL UNIQUE,
                user_name TEXT NOT NULL DEFAULT '',
                chat_id INTEGER NOT NULL UNIQUE,
                noti INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT,
                last_build_date TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                description TEXT,
                published_at TEXT NOT NULL,
                guid TEXT NOT NULL,
                author TEXT,
                categories TEXT NOT NULL DEFAULT '[]',
                is_processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(feed_id, guid)
            );

            CREATE INDEX IF NOT EXISTS idx_articles_published_at
            ON articles(published_at DESC);

            CREATE INDEX IF NOT EXISTS idx_articles_unprocessed
            ON articles(is_processed, published_at);
            ",
        )?;

        Ok(Self { conn })
    }

    pub fn into_shared(self) -> SharedStorage {
        Arc::new(Mutex::new(self))
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that
/// lexicographic order matches chronological order.
pub(crate) fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

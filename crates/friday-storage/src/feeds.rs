use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{decode_time, encode_time, Result, Storage, StorageError};

const UNKNOWN_FEED_TITLE: &str = "Unknown Feed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub last_build_date: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Channel-level fields reported by the source on the latest fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub last_build_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub guid: String,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub guid: String,
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub is_processed: bool,
}

pub trait FeedRepository: Send {
    fn find_active_feeds(&self) -> Result<Vec<Feed>>;

    fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>>;

    /// Inserts the feed on first sight, otherwise refreshes the fields the
    /// metadata carries. Repeated calls with the same URL yield the same id.
    fn find_or_create_feed(&mut self, url: &str, metadata: &FeedMetadata) -> Result<Feed>;

    fn exists_article(&self, feed_id: i64, guid: &str) -> Result<bool>;

    /// Fails with `Conflict` when `(feed_id, guid)` is already stored.
    fn save_article(&mut self, article: &NewArticle) -> Result<Article>;

    fn mark_processed(&mut self, article_id: i64) -> Result<()>;

    /// Newest first by publication time.
    fn find_unprocessed_articles(&self) -> Result<Vec<Article>>;

    fn deactivate_feed(&mut self, feed_id: i64) -> Result<()>;

    fn activate_feed(&mut self, feed_id: i64) -> Result<()>;
}

const FEED_COLUMNS: &str = "id, url, title, description, last_build_date, is_active";

const ARTICLE_SELECT: &str = "SELECT a.id, a.feed_id, f.title, a.title, a.link, a.description,
        a.published_at, a.guid, a.author, a.categories, a.is_processed
     FROM articles a JOIN feeds f ON f.id = a.feed_id";

struct FeedRow {
    id: i64,
    url: String,
    title: String,
    description: Option<String>,
    last_build_date: Option<String>,
    is_active: bool,
}

impl FeedRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            last_build_date: row.get(4)?,
            is_active: row.get(5)?,
        })
    }

    fn into_feed(self) -> Result<Feed> {
        let last_build_date = match self.last_build_date.as_deref() {
            Some(raw) => Some(decode_time(raw)?),
            None => None,
        };
        Ok(Feed {
            id: self.id,
            url: self.url,
            title: self.title,
            description: self.description,
            last_build_date,
            is_active: self.is_active,
        })
    }
}

struct ArticleRow {
    id: i64,
    feed_id: i64,
    feed_title: String,
    title: String,
    link: String,
    description: Option<String>,
    published_at: String,
    guid: String,
    author: Option<String>,
    categories: String,
    is_processed: bool,
}

impl ArticleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            feed_id: row.get(1)?,
            feed_title: row.get(2)?,
            title: row.get(3)?,
            link: row.get(4)?,
            description: row.get(5)?,
            published_at: row.get(6)?,
            guid: row.get(7)?,
            author: row.get(8)?,
            categories: row.get(9)?,
            is_processed: row.get(10)?,
        })
    }

    fn into_article(self) -> Result<Article> {
        let categories: Vec<String> = serde_json::from_str(&self.categories)
            .map_err(|e| StorageError::Corrupt(format!("categories of article {}: {}", self.id, e)))?;
        Ok(Article {
            id: self.id,
            feed_id: self.feed_id,
            feed_title: self.feed_title,
            title: self.title,
            link: self.link,
            description: self.description,
            published_at: decode_time(&self.published_at)?,
            guid: self.guid,
            author: self.author,
            categories,
            is_processed: self.is_processed,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl Storage {
    fn feed_by_id(&self, feed_id: i64) -> Result<Option<Feed>> {
        let sql = format!("SELECT {} FROM feeds WHERE id = ?1", FEED_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [feed_id], FeedRow::from_row)
            .optional()?;
        row.map(FeedRow::into_feed).transpose()
    }

    fn article_by_id(&self, article_id: i64) -> Result<Article> {
        let sql = format!("{} WHERE a.id = ?1", ARTICLE_SELECT);
        let row = self
            .conn
            .query_row(&sql, [article_id], ArticleRow::from_row)
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("article {}", article_id)))?;
        row.into_article()
    }

    fn set_feed_active(&mut self, feed_id: i64, active: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE feeds SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            (active, encode_time(&Utc::now()), feed_id),
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("feed {}", feed_id)));
        }
        Ok(())
    }

    /// All feeds including inactive ones, oldest first.
    pub fn list_feeds(&self) -> Result<Vec<Feed>> {
        let sql = format!("SELECT {} FROM feeds ORDER BY id", FEED_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], FeedRow::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_feed()?);
        }
        Ok(result)
    }

    pub fn count_unprocessed_articles(&self) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE is_processed = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl FeedRepository for Storage {
    fn find_active_feeds(&self) -> Result<Vec<Feed>> {
        let sql = format!(
            "SELECT {} FROM feeds WHERE is_active = 1 ORDER BY id",
            FEED_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], FeedRow::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_feed()?);
        }
        Ok(result)
    }

    fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let sql = format!("SELECT {} FROM feeds WHERE url = ?1", FEED_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [url], FeedRow::from_row)
            .optional()?;
        row.map(FeedRow::into_feed).transpose()
    }

    fn find_or_create_feed(&mut self, url: &str, metadata: &FeedMetadata) -> Result<Feed> {
        let now = encode_time(&Utc::now());
        let last_build_date = metadata.last_build_date.as_ref().map(encode_time);

        if let Some(existing) = self.find_feed_by_url(url)? {
            self.conn.execute(
                "UPDATE feeds
                 SET title = COALESCE(?1, title),
                     description = COALESCE(?2, description),
                     last_build_date = COALESCE(?3, last_build_date),
                     updated_at = ?4
                 WHERE id = ?5",
                (
                    non_empty(&metadata.title),
                    non_empty(&metadata.description),
                    last_build_date,
                    &now,
                    existing.id,
                ),
            )?;
            return self
                .feed_by_id(existing.id)?
                .ok_or_else(|| StorageError::NotFound(format!("feed {}", existing.id)));
        }

        let title = non_empty(&metadata.title).unwrap_or(UNKNOWN_FEED_TITLE);
        self.conn.execute(
            "INSERT INTO feeds (url, title, description, last_build_date, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            (url, title, non_empty(&metadata.description), last_build_date, &now),
        )?;
        let id = self.conn.last_insert_rowid();
        info!(feed_id = id, url, title, "Feed registered");

        self.feed_by_id(id)?
            .ok_or_else(|| StorageError::NotFound(format!("feed {}", id)))
    }

    fn exists_article(&self, feed_id: i64, guid: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM articles WHERE feed_id = ?1 AND guid = ?2 LIMIT 1",
                (feed_id, guid),
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn save_article(&mut self, article: &NewArticle) -> Result<Article> {
        let categories = serde_json::to_string(&article.categories)
            .map_err(|e| StorageError::Corrupt(format!("categories: {}", e)))?;

        let inserted = self.conn.execute(
            "INSERT INTO articles
                (feed_id, title, link, description, published_at, guid, author, categories, is_processed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)
             ON CONFLICT(feed_id, guid) DO NOTHING",
            (
                article.feed_id,
                &article.title,
                &article.link,
                &article.description,
                encode_time(&article.published_at),
                &article.guid,
                &article.author,
                categories,
                encode_time(&Utc::now()),
            ),
        )?;

        if inserted == 0 {
            return Err(StorageError::Conflict(format!(
                "article {} in feed {}",
                article.guid, article.feed_id
            )));
        }

        self.article_by_id(self.conn.last_insert_rowid())
    }

    fn mark_processed(&mut self, article_id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("UPDATE articles SET is_processed = 1 WHERE id = ?1", [article_id])?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("article {}", article_id)));
        }
        Ok(())
    }

    fn find_unprocessed_articles(&self) -> Result<Vec<Article>> {
        let sql = format!(
            "{} WHERE a.is_processed = 0 ORDER BY a.published_at DESC, a.id DESC",
            ARTICLE_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], ArticleRow::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_article()?);
        }
        Ok(result)
    }

    fn deactivate_feed(&mut self, feed_id: i64) -> Result<()> {
        self.set_feed_active(feed_id, false)?;
        info!(feed_id, "Feed deactivated");
        Ok(())
    }

    fn activate_feed(&mut self, feed_id: i64) -> Result<()> {
        self.set_feed_active(feed_id, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn storage() -> Storage {
        Storage::in_memory().expect("in-memory storage")
    }

    fn new_article(feed_id: i64, guid: &str, published_at: DateTime<Utc>) -> NewArticle {
        NewArticle {
            feed_id,
            title: format!("title {}", guid),
            link: format!("https://example.com/{}", guid),
            description: Some("body".to_string()),
            published_at,
            guid: guid.to_string(),
            author: None,
            categories: vec!["rust".to_string()],
        }
    }

    #[test]
    fn find_or_create_feed_is_idempotent_by_url() {
        let mut storage = storage();
        let metadata = FeedMetadata {
            title: Some("Dev".to_string()),
            ..Default::default()
        };
        let first = storage
            .find_or_create_feed("https://dev.to/feed", &metadata)
            .expect("create");
        let second = storage
            .find_or_create_feed("https://dev.to/feed", &metadata)
            .expect("find");

        assert_eq!(first.id, second.id);
        assert_eq!(storage.list_feeds().expect("list").len(), 1);
    }

    #[test]
    fn refresh_keeps_title_when_metadata_is_missing() {
        let mut storage = storage();
        storage
            .find_or_create_feed(
                "https://a.example/feed",
                &FeedMetadata {
                    title: Some("Original".to_string()),
                    description: Some("desc".to_string()),
                    last_build_date: None,
                },
            )
            .expect("create");

        let refreshed = storage
            .find_or_create_feed(
                "https://a.example/feed",
                &FeedMetadata {
                    title: Some("  ".to_string()),
                    description: None,
                    last_build_date: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
                },
            )
            .expect("refresh");

        assert_eq!(refreshed.title, "Original");
        assert_eq!(refreshed.description.as_deref(), Some("desc"));
        assert!(refreshed.last_build_date.is_some());
    }

    #[test]
    fn unique_article_per_feed_and_guid() {
        let mut storage = storage();
        let feed = storage
            .find_or_create_feed("https://a.example/feed", &FeedMetadata::default())
            .expect("feed");
        let other = storage
            .find_or_create_feed("https://b.example/feed", &FeedMetadata::default())
            .expect("feed");
        let now = Utc::now();

        storage
            .save_article(&new_article(feed.id, "g1", now))
            .expect("first save");
        assert!(storage.exists_article(feed.id, "g1").expect("exists"));
        assert!(!storage.exists_article(other.id, "g1").expect("exists"));

        let duplicate = storage.save_article(&new_article(feed.id, "g1", now));
        assert!(matches!(duplicate, Err(StorageError::Conflict(_))));

        storage
            .save_article(&new_article(other.id, "g1", now))
            .expect("same guid in another feed");
    }

    #[test]
    fn unprocessed_articles_are_newest_first_and_leave_after_marking() {
        let mut storage = storage();
        let feed = storage
            .find_or_create_feed("https://a.example/feed", &FeedMetadata::default())
            .expect("feed");
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let old = storage
            .save_article(&new_article(feed.id, "old", base))
            .expect("old");
        storage
            .save_article(&new_article(feed.id, "new", base + Duration::hours(3)))
            .expect("new");
        storage
            .save_article(&new_article(feed.id, "mid", base + Duration::hours(1)))
            .expect("mid");

        let guids: Vec<String> = storage
            .find_unprocessed_articles()
            .expect("unprocessed")
            .into_iter()
            .map(|a| a.guid)
            .collect();
        assert_eq!(guids, vec!["new", "mid", "old"]);

        storage.mark_processed(old.id).expect("mark");
        let remaining = storage.find_unprocessed_articles().expect("unprocessed");
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|a| !a.is_processed));
        assert_eq!(storage.count_unprocessed_articles().expect("count"), 2);
    }

    #[test]
    fn saved_article_keeps_categories_and_feed_title() {
        let mut storage = storage();
        let feed = storage
            .find_or_create_feed(
                "https://a.example/feed",
                &FeedMetadata {
                    title: Some("Example".to_string()),
                    ..Default::default()
                },
            )
            .expect("feed");
        let saved = storage
            .save_article(&new_article(feed.id, "g", Utc::now()))
            .expect("save");
        assert_eq!(saved.feed_title, "Example");
        assert_eq!(saved.categories, vec!["rust".to_string()]);
        assert!(!saved.is_processed);
    }

    #[test]
    fn deactivated_feed_is_not_active_but_kept() {
        let mut storage = storage();
        let feed = storage
            .find_or_create_feed("https://a.example/feed", &FeedMetadata::default())
            .expect("feed");

        storage.deactivate_feed(feed.id).expect("deactivate");
        assert!(storage.find_active_feeds().expect("active").is_empty());
        assert_eq!(storage.list_feeds().expect("all").len(), 1);

        storage.activate_feed(feed.id).expect("activate");
        assert_eq!(storage.find_active_feeds().expect("active").len(), 1);
    }

    #[test]
    fn marking_unknown_article_is_not_found() {
        let mut storage = storage();
        assert!(matches!(
            storage.mark_processed(99),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.deactivate_feed(99),
            Err(StorageError::NotFound(_))
        ));
    }
}

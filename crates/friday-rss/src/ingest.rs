use chrono::Utc;
use friday_storage::{Article, Feed, FeedMetadata, NewArticle, SharedFeedRepository, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::fetcher::{FeedFetcher, FetchError};
use crate::parser::{FeedItem, ParsedFeed};

const UNTITLED: &str = "Untitled";

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct FeedIngestor {
    feeds: SharedFeedRepository,
    fetcher: Arc<dyn FeedFetcher>,
    fetch_timeout: Duration,
}

impl FeedIngestor {
    pub fn new(
        feeds: SharedFeedRepository,
        fetcher: Arc<dyn FeedFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            feeds,
            fetcher,
            fetch_timeout,
        }
    }

    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    /// Fetches the source and registers it, refreshing metadata if the URL is
    /// already known. A previously deactivated feed becomes active again.
    pub async fn register_feed(&self, url: &str) -> Result<Feed, IngestError> {
        let url = url.trim();
        let parsed = self.fetch(url).await?;

        let mut feeds = self.feeds.lock().await;
        let feed = feeds.find_or_create_feed(url, &parsed.metadata)?;
        if !feed.is_active {
            feeds.activate_feed(feed.id)?;
            info!(feed_id = feed.id, url, "Feed reactivated");
            return Ok(Feed {
                is_active: true,
                ..feed
            });
        }
        Ok(feed)
    }

    /// Registers `url` without contacting it; metadata is filled on the next run.
    pub async fn register_feed_offline(&self, url: &str) -> Result<Feed, IngestError> {
        let mut feeds = self.feeds.lock().await;
        Ok(feeds.find_or_create_feed(url.trim(), &FeedMetadata::default())?)
    }

    /// One pass over every active feed. Feeds fail independently; the
    /// returned articles follow feed order, then item order.
    pub async fn ingest(&self) -> Result<Vec<Article>, StorageError> {
        let active = self.feeds.lock().await.find_active_feeds()?;
        let mut all_new = Vec::new();

        for feed in &active {
            match self.ingest_feed(feed).await {
                Ok(mut articles) => {
                    if !articles.is_empty() {
                        info!(
                            feed_id = feed.id,
                            feed = %feed.title,
                            new_articles = articles.len(),
                            "Feed ingested"
                        );
                    }
                    all_new.append(&mut articles);
                }
                Err(e) => {
                    warn!(feed_id = feed.id, url = %feed.url, "Feed ingestion failed: {}", e);
                }
            }
        }

        info!(
            feeds = active.len(),
            new_articles = all_new.len(),
            "Ingestion finished"
        );
        Ok(all_new)
    }

    async fn ingest_feed(&self, feed: &Feed) -> Result<Vec<Article>, IngestError> {
        let parsed = self.fetch(&feed.url).await?;

        let mut repo = self.feeds.lock().await;
        let feed = repo.find_or_create_feed(&feed.url, &parsed.metadata)?;

        let mut saved = Vec::new();
        for item in parsed.items {
            let Some(guid) = item.identity().map(str::to_string) else {
                warn!(
                    feed_id = feed.id,
                    title = item.title.as_deref().unwrap_or(UNTITLED),
                    "Skipping item without guid or link"
                );
                continue;
            };

            if repo.exists_article(feed.id, &guid)? {
                continue;
            }

            match repo.save_article(&to_new_article(feed.id, guid, item)) {
                Ok(article) => saved.push(article),
                // Duplicate guid inside the same document.
                Err(StorageError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(saved)
    }
}

fn to_new_article(feed_id: i64, guid: String, item: FeedItem) -> NewArticle {
    NewArticle {
        feed_id,
        title: item.title.unwrap_or_else(|| UNTITLED.to_string()),
        link: item.link.unwrap_or_default(),
        description: item.description,
        published_at: item.published_at.unwrap_or_else(Utc::now),
        guid,
        author: item.author,
        categories: item.categories,
    }
}

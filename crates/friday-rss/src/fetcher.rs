use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::debug;

use crate::parser::{parse_feed, ParsedFeed};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feed request timed out")]
    Timeout,
    #[error("feed request failed: {0}")]
    Http(String),
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("feed could not be parsed: {0}")]
    Parse(String),
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError>;
}

pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(concat!("friday-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        let response = self
            .client
            .get(url)
            .header(
                "Accept",
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8",
            )
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e.to_string())
            }
        })?;
        debug!(url, bytes = body.len(), "Feed downloaded");

        parse_feed(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetches_and_parses_remote_feed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/feed")
            .with_status(200)
            .with_header("content-type", "application/rss+xml")
            .with_body(
                r#"<rss version="2.0"><channel><title>Remote</title>
                <item><title>One</title><link>https://r.example/1</link></item>
                </channel></rss>"#,
            )
            .create_async()
            .await;

        let fetcher = HttpFeedFetcher::new(Duration::from_secs(5)).expect("fetcher");
        let feed = fetcher
            .fetch(&format!("{}/feed", server.url()))
            .await
            .expect("fetch");
        assert_eq!(feed.metadata.title.as_deref(), Some("Remote"));
        assert_eq!(feed.items.len(), 1);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/gone")
            .with_status(410)
            .create_async()
            .await;

        let fetcher = HttpFeedFetcher::new(Duration::from_secs(5)).expect("fetcher");
        let err = fetcher
            .fetch(&format!("{}/gone", server.url()))
            .await
            .expect_err("must fail");
        assert!(matches!(err, FetchError::Status(410)));
    }

    #[tokio::test]
    async fn html_page_is_a_parse_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("<html><body>not a feed</body></html>")
            .create_async()
            .await;

        let fetcher = HttpFeedFetcher::new(Duration::from_secs(5)).expect("fetcher");
        let err = fetcher.fetch(&server.url()).await.expect_err("must fail");
        assert!(matches!(err, FetchError::Parse(_)));
    }
}

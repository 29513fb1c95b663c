use async_trait::async_trait;
use friday_cron::Job;
use tracing::info;

use crate::ingest::FeedIngestor;
use crate::notify::{FanoutReport, Notifier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub new_articles: usize,
    pub fanout: Option<FanoutReport>,
}

/// Ingestion followed by fan-out of whatever was new.
pub struct FeedCheck {
    ingestor: FeedIngestor,
    notifier: Notifier,
}

impl FeedCheck {
    pub fn new(ingestor: FeedIngestor, notifier: Notifier) -> Self {
        Self { ingestor, notifier }
    }

    pub fn ingestor(&self) -> &FeedIngestor {
        &self.ingestor
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn run_once(&self) -> anyhow::Result<CheckSummary> {
        let articles = self.ingestor.ingest().await?;
        if articles.is_empty() {
            info!("No new articles");
            return Ok(CheckSummary::default());
        }

        let report = self.notifier.notify(&articles).await?;
        Ok(CheckSummary {
            new_articles: articles.len(),
            fanout: Some(report),
        })
    }
}

#[async_trait]
impl Job for FeedCheck {
    fn name(&self) -> &str {
        "rss-check"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let summary = self.run_once().await?;
        info!(new_articles = summary.new_articles, "RSS check finished");
        Ok(())
    }
}

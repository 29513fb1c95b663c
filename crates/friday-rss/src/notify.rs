use friday_ipc::SharedTransport;
use friday_storage::{Article, SharedFeedRepository, SharedUserStore, StorageError, User};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

const DESCRIPTION_EXCERPT_CHARS: usize = 200;

static MARKDOWN_SPECIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([_*`\[])").expect("valid markdown pattern"));

pub const TEST_NOTIFICATION: &str = "🧪 *RSS notification test*\n\nIf you can read this, RSS notifications reach this chat.";

/// Escapes the characters Telegram's Markdown mode treats as entity markers.
pub fn escape_markdown(text: &str) -> String {
    MARKDOWN_SPECIAL_RE.replace_all(text, r"\$1").into_owned()
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

pub fn format_article_message(article: &Article) -> String {
    let mut message = String::from("🔔 *New article*\n\n");
    message.push_str(&format!("📰 *{}*\n\n", escape_markdown(&article.title)));

    if let Some(description) = article.description.as_deref().filter(|d| !d.is_empty()) {
        message.push_str(&format!(
            "📝 {}\n\n",
            escape_markdown(&excerpt(description, DESCRIPTION_EXCERPT_CHARS))
        ));
    }

    if !article.link.is_empty() {
        message.push_str(&format!("🔗 [Read more]({})\n", article.link));
    }
    message.push_str(&format!(
        "📅 {}\n",
        article.published_at.format("%Y-%m-%d %H:%M UTC")
    ));
    message.push_str(&format!("📡 Source: {}", escape_markdown(&article.feed_title)));

    if let Some(author) = article.author.as_deref().filter(|a| !a.is_empty()) {
        message.push_str(&format!("\n✍️ Author: {}", escape_markdown(author)));
    }

    message
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub articles: usize,
    pub subscribers: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Notifier {
    feeds: SharedFeedRepository,
    users: SharedUserStore,
    transport: SharedTransport,
    delivery_timeout: Duration,
}

impl Notifier {
    pub fn new(
        feeds: SharedFeedRepository,
        users: SharedUserStore,
        transport: SharedTransport,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            feeds,
            users,
            transport,
            delivery_timeout,
        }
    }

    async fn deliver(&self, user: &User, text: &str) -> bool {
        let send = self.transport.send_message(user.chat_id, text, None);
        match tokio::time::timeout(self.delivery_timeout, send).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(
                    user_id = %user.user_id,
                    chat_id = user.chat_id,
                    "Notification delivery failed: {:#}",
                    e
                );
                false
            }
            Err(_) => {
                warn!(
                    user_id = %user.user_id,
                    chat_id = user.chat_id,
                    timeout_secs = self.delivery_timeout.as_secs(),
                    "Notification delivery timed out"
                );
                false
            }
        }
    }

    /// Sends every article to every opted-in subscriber, then marks each
    /// article processed once. With no subscribers nothing is marked, so
    /// the articles stay listed as unread.
    pub async fn notify(&self, articles: &[Article]) -> Result<FanoutReport, StorageError> {
        let subscribers = self.users.lock().await.get_users_with_notification_enabled()?;
        let mut report = FanoutReport {
            articles: articles.len(),
            subscribers: subscribers.len(),
            ..Default::default()
        };

        if subscribers.is_empty() {
            info!(articles = articles.len(), "No subscribers to notify");
            return Ok(report);
        }

        for article in articles {
            let text = format_article_message(article);
            for user in &subscribers {
                if self.deliver(user, &text).await {
                    report.delivered += 1;
                } else {
                    report.failed += 1;
                }
            }

            if let Err(e) = self.feeds.lock().await.mark_processed(article.id) {
                warn!(article_id = article.id, "Failed to mark article processed: {}", e);
            }
        }

        info!(
            articles = report.articles,
            subscribers = report.subscribers,
            delivered = report.delivered,
            failed = report.failed,
            "Notification fan-out finished"
        );
        Ok(report)
    }

    pub async fn send_test(&self, chat_id: i64) -> anyhow::Result<()> {
        tokio::time::timeout(
            self.delivery_timeout,
            self.transport.send_message(chat_id, TEST_NOTIFICATION, None),
        )
        .await
        .map_err(|_| anyhow::anyhow!("test notification timed out"))??;
        info!(chat_id, "Test notification sent");
        Ok(())
    }
}

use async_trait::async_trait;
use friday_rss::{escape_markdown, IngestError};
use tracing::warn;
use url::Url;

use crate::command::{Command, CommandContext, Reply};
use crate::commands::noti::{set_notifications, UNKNOWN_USER};
use crate::error::CommandError;

const UNREAD_LIMIT: usize = 5;

const HELP: &str = "🔔 *RSS commands*

• /rss\\_check - check every feed now
• /rss\\_feeds - list active feeds
• /rss\\_unread - show unread articles
• /rss\\_test - send a test notification
• /rss\\_noti\\_on or /rss\\_noti\\_off - turn notifications on or off
• /rss\\_add\\_<url> - subscribe to a feed
• /rss\\_remove\\_<n> - drop feed number n

Feeds are checked automatically every few minutes.";

fn split_subcommand(argument: &str) -> (&str, Option<&str>) {
    match argument.split_once(|c: char| c == '_' || c.is_whitespace()) {
        Some((head, rest)) => {
            let rest = rest.trim();
            (head, (!rest.is_empty()).then_some(rest))
        }
        None => (argument, None),
    }
}

pub struct RssCommand;

impl RssCommand {
    async fn check(&self, ctx: &CommandContext<'_>) -> Reply {
        let feed_check = &ctx.services.feed_check;
        match ctx.services.check_guard.run(feed_check.run_once()).await {
            None => Reply::text("⏳ A feed check is already running. Try again shortly."),
            Some(Err(e)) => {
                warn!("Manual feed check failed: {:#}", e);
                Reply::text(format!("❌ Feed check failed: {}", e))
            }
            Some(Ok(summary)) if summary.new_articles == 0 => {
                Reply::text("📰 No new articles.")
            }
            Some(Ok(summary)) => {
                let mut text = format!("✅ Found {} new article(s).", summary.new_articles);
                if let Some(report) = summary.fanout {
                    text.push_str(&format!(
                        "\n📨 Delivered {} notification(s) to {} subscriber(s).",
                        report.delivered, report.subscribers
                    ));
                }
                Reply::Text(text)
            }
        }
    }

    async fn feeds(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        let feeds = ctx.services.feeds.lock().await.find_active_feeds()?;
        if feeds.is_empty() {
            return Ok(Reply::text("📰 No active feeds."));
        }

        let mut text = String::from("📰 *Active feeds*\n");
        for (i, feed) in feeds.iter().enumerate() {
            text.push_str(&format!(
                "\n{}. *{}*\n   🔗 {}\n",
                i + 1,
                escape_markdown(&feed.title),
                feed.url
            ));
        }
        Ok(Reply::Text(text))
    }

    async fn unread(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        let articles = ctx.services.feeds.lock().await.find_unprocessed_articles()?;
        if articles.is_empty() {
            return Ok(Reply::text("📰 No unread articles."));
        }

        let shown = articles.len().min(UNREAD_LIMIT);
        let mut text = format!("📰 *Unread articles ({}/{})*\n", shown, articles.len());
        for (i, article) in articles.iter().take(UNREAD_LIMIT).enumerate() {
            text.push_str(&format!(
                "\n{}. *{}*\n   🔗 [Link]({})\n   📅 {}\n",
                i + 1,
                escape_markdown(&article.title),
                article.link,
                article.published_at.format("%Y-%m-%d")
            ));
        }
        if articles.len() > UNREAD_LIMIT {
            text.push_str(&format!("\n... and {} more", articles.len() - UNREAD_LIMIT));
        }
        Ok(Reply::Text(text))
    }

    async fn test(&self, ctx: &CommandContext<'_>) -> Reply {
        match ctx.services.feed_check.notifier().send_test(ctx.chat_id()).await {
            Ok(()) => Reply::text("✅ Test notification sent!"),
            Err(e) => Reply::text(format!("❌ Test notification failed: {}", e)),
        }
    }

    async fn notifications(
        &self,
        ctx: &CommandContext<'_>,
        setting: Option<&str>,
    ) -> Result<Reply, CommandError> {
        let enabled = match setting.map(str::to_lowercase).as_deref() {
            Some("on") => true,
            Some("off") => false,
            _ => return Ok(Reply::text("❌ Usage: /rss_noti_on or /rss_noti_off")),
        };

        if !set_notifications(ctx, enabled).await? {
            return Ok(Reply::text(UNKNOWN_USER));
        }
        Ok(Reply::text(format!(
            "✅ RSS notifications turned {}.",
            if enabled { "on" } else { "off" }
        )))
    }

    async fn add(&self, ctx: &CommandContext<'_>, url: Option<&str>) -> Result<Reply, CommandError> {
        let Some(url) = url else {
            return Ok(Reply::text("❌ Usage: /rss_add_<feed url>"));
        };
        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Ok(Reply::text("❌ That does not look like an http(s) URL.")),
        }

        match ctx.services.feed_check.ingestor().register_feed(url).await {
            Ok(feed) => Ok(Reply::text(format!(
                "✅ Subscribed to *{}*\n🔗 {}",
                escape_markdown(&feed.title),
                feed.url
            ))),
            Err(IngestError::Fetch(e)) => {
                Ok(Reply::text(format!("❌ Could not read that feed: {}", e)))
            }
            Err(IngestError::Storage(e)) => Err(e.into()),
        }
    }

    async fn remove(
        &self,
        ctx: &CommandContext<'_>,
        position: Option<&str>,
    ) -> Result<Reply, CommandError> {
        let mut repo = ctx.services.feeds.lock().await;
        let feeds = repo.find_active_feeds()?;
        let feed = position
            .and_then(|p| p.trim().parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| feeds.get(i));

        let Some(feed) = feed else {
            return Ok(Reply::text(
                "❌ No such feed. Send /rss_feeds to see the numbered list.",
            ));
        };
        repo.deactivate_feed(feed.id)?;
        Ok(Reply::text(format!(
            "🗑️ Removed *{}*.",
            escape_markdown(&feed.title)
        )))
    }
}

#[async_trait]
impl Command for RssCommand {
    fn name(&self) -> &str {
        "/rss"
    }

    fn description(&self) -> &str {
        "RSS feeds and notifications"
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        let Some(argument) = ctx.argument() else {
            return Ok(Reply::text(HELP));
        };

        let (subcommand, rest) = split_subcommand(argument);
        match subcommand.to_lowercase().as_str() {
            "check" => Ok(self.check(ctx).await),
            "feeds" => self.feeds(ctx).await,
            "unread" => self.unread(ctx).await,
            "test" => Ok(self.test(ctx).await),
            "noti" => self.notifications(ctx, rest).await,
            "add" => self.add(ctx, rest).await,
            "remove" => self.remove(ctx, rest).await,
            _ => Ok(Reply::text(HELP)),
        }
    }
}

use async_trait::async_trait;
use friday_cron::SingleFlight;
use friday_ipc::InlineKeyboard;
use friday_rss::FeedCheck;
use friday_storage::{SharedFeedRepository, SharedUserStore};
use friday_weather::WeatherProvider;
use std::sync::Arc;

use crate::error::CommandError;
use crate::registry::CommandRegistry;
use crate::session::{Session, SessionKey, SessionStore};

/// Handles shared by every command, built once at startup.
#[derive(Clone)]
pub struct Services {
    pub users: SharedUserStore,
    pub feeds: SharedFeedRepository,
    pub weather: Arc<dyn WeatherProvider>,
    /// `metric`, `imperial` or `standard`, as sent to the weather API.
    pub weather_units: String,
    pub feed_check: Arc<FeedCheck>,
    pub check_guard: Arc<SingleFlight>,
}

/// How the dispatcher reached the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// The user typed the command token.
    Start,
    /// Plain text while this command's session is active.
    Continue,
    /// A button from an earlier reply was pressed.
    Select,
}

pub struct CommandContext<'a> {
    pub invocation: Invocation,
    pub argument: Option<String>,
    pub key: SessionKey,
    pub user_name: String,
    /// Snapshot of the caller's session taken before the handler ran.
    pub session: Option<Session>,
    pub sessions: &'a SessionStore,
    pub services: &'a Services,
    pub registry: &'a CommandRegistry,
}

impl CommandContext<'_> {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    pub fn user_id(&self) -> &str {
        &self.key.user_id
    }

    pub fn chat_id(&self) -> i64 {
        self.key.chat_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Keyboard {
        text: String,
        keyboard: InlineKeyboard,
    },
    /// Nothing to say. For a button press the dispatcher shows an alert.
    None,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Reply::Text(text) | Reply::Keyboard { text, .. } => Some(text),
            Reply::None => None,
        }
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    /// Token including the leading slash, e.g. `/weather`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn usage(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError>;
}

//! Routes inbound events to command handlers.
//!
//! A `/token` always starts that command. Plain text continues the caller's
//! session, if any, and is otherwise ignored. Button presses carrying
//! `<command>_select_<n>` continue `/<command>` with argument `<n>`.
//! Events for one (user, chat) pair are handled strictly one at a time.

use friday_ipc::{Envelope, MessageKind, SharedTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandContext, Invocation, Reply, Services};
use crate::registry::CommandRegistry;
use crate::session::{SessionKey, SessionStore};

pub const MAX_INBOUND_CONCURRENCY: usize = 8;

const FALLBACK_USER_NAME: &str = "friend";
const SELECTION_MARKER: &str = "_select_";

pub const RECOVERY_REPLY: &str = "❌ Something went wrong. Please try again.";
pub const EXPIRED_SELECTION_ALERT: &str =
    "⌛ This selection has expired. Please start the command again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub token: String,
    pub argument: Option<String>,
}

fn non_empty(text: &str) -> Option<&str> {
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

/// Telegram bot usernames end in `bot` and use `[A-Za-z0-9_]` only.
fn is_bot_username(name: &str) -> bool {
    name.len() > 3
        && name.to_ascii_lowercase().ends_with("bot")
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Drops a trailing `@bot_username` mention from the first word. An `@`
/// inside an inline argument, such as `/rss_add_https://medium.com/feed/@someone`,
/// is left alone.
fn strip_mention(head: &str) -> &str {
    match head.rsplit_once('@') {
        Some((command, name)) if is_bot_username(name) => command,
        _ => head,
    }
}

/// Splits `/token_argument`, `/token argument` and `/token@bot argument`.
/// Returns `None` for text that is not a command.
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    let (head, tail) = match text.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, non_empty(tail)),
        None => (text, None),
    };
    let head = strip_mention(head);
    let (token, inline) = match head.split_once('_') {
        Some((token, inline)) => (token, non_empty(inline)),
        None => (head, None),
    };
    if token.len() < 2 {
        return None;
    }

    let argument = match (inline, tail) {
        (Some(inline), Some(tail)) => Some(format!("{} {}", inline, tail)),
        (Some(arg), None) | (None, Some(arg)) => Some(arg.to_string()),
        (None, None) => None,
    };

    Some(ParsedCommand {
        token: token.to_string(),
        argument,
    })
}

/// Reads `weather_select_2` as (`/weather`, `2`).
pub fn parse_selection(data: &str) -> Option<ParsedCommand> {
    let (command, choice) = data.split_once(SELECTION_MARKER)?;
    if command.is_empty() || choice.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        token: format!("/{}", command),
        argument: Some(choice.to_string()),
    })
}

pub fn selection_data(command: &str, choice: usize) -> String {
    format!(
        "{}{}{}",
        command.trim_start_matches('/'),
        SELECTION_MARKER,
        choice
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text(String),
    Button { callback_id: String, data: String },
}

#[derive(Debug, Clone)]
pub struct Inbound {
    pub key: SessionKey,
    pub user_name: String,
    pub message_id: Option<i64>,
    pub event: InboundEvent,
}

impl Inbound {
    pub fn text(user_id: &str, chat_id: i64, user_name: &str, text: &str) -> Self {
        Self {
            key: SessionKey::new(user_id, chat_id),
            user_name: user_name.to_string(),
            message_id: None,
            event: InboundEvent::Text(text.to_string()),
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let chat_id = envelope.chat_id?;
        let user_id = envelope.kind.sender().to_string();
        let event = match &envelope.kind {
            MessageKind::Message { text, .. } => InboundEvent::Text(text.clone()),
            MessageKind::Callback { query_id, data, .. } => InboundEvent::Button {
                callback_id: query_id.clone(),
                data: data.clone(),
            },
        };

        Some(Self {
            key: SessionKey::new(user_id, chat_id),
            user_name: envelope
                .user_name()
                .unwrap_or(FALLBACK_USER_NAME)
                .to_string(),
            message_id: envelope.message_id,
            event,
        })
    }
}

pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    sessions: Arc<SessionStore>,
    services: Services,
    transport: SharedTransport,
    scope_locks: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        sessions: Arc<SessionStore>,
        services: Services,
        transport: SharedTransport,
    ) -> Self {
        Self {
            registry,
            sessions,
            services,
            transport,
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    async fn scope_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self.scope_locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Handles one event to completion, session changes and reply included.
    pub async fn dispatch(&self, inbound: Inbound) {
        let scope_lock = self.scope_lock(&inbound.key).await;
        {
            let _scope_guard = scope_lock.lock().await;
            match &inbound.event {
                InboundEvent::Text(text) => {
                    let reply = self.route_text(&inbound, text).await;
                    self.send_reply(&inbound, reply).await;
                }
                InboundEvent::Button { callback_id, data } => {
                    self.route_button(&inbound, callback_id, data).await;
                }
            }
        }
        self.release_scope(&inbound.key, scope_lock).await;
    }

    /// Forgets the lock of an idle scope. Clones are only handed out under the
    /// map lock, so a count of two (map plus ours) means nobody is waiting.
    async fn release_scope(&self, key: &SessionKey, scope_lock: Arc<Mutex<()>>) {
        let mut locks = self.scope_locks.lock().await;
        if Arc::strong_count(&scope_lock) == 2 {
            locks.remove(key);
        }
    }

    /// Number of (user, chat) scopes with an event in flight.
    pub async fn active_scopes(&self) -> usize {
        self.scope_locks.lock().await.len()
    }

    async fn route_text(&self, inbound: &Inbound, text: &str) -> Reply {
        if let Some(parsed) = parse_command(text) {
            return match self.registry.resolve(&parsed.token) {
                Some(handler) => {
                    self.invoke(handler, Invocation::Start, parsed.argument, inbound)
                        .await
                }
                None => {
                    debug!(token = %parsed.token, "Unknown command");
                    Reply::text(format!(
                        "❓ Unknown command: {}\nSend /help to see what I can do.",
                        parsed.token
                    ))
                }
            };
        }

        let Some(session) = self.sessions.get(&inbound.key).await else {
            debug!(chat_id = inbound.key.chat_id, "Ignoring text outside a flow");
            return Reply::None;
        };

        match self.registry.resolve(&session.command) {
            Some(handler) => {
                let argument = non_empty(text).map(str::to_string);
                self.invoke(handler, Invocation::Continue, argument, inbound)
                    .await
            }
            None => {
                warn!(command = %session.command, "Session points at an unregistered command");
                self.sessions.clear(&inbound.key).await;
                Reply::text(RECOVERY_REPLY)
            }
        }
    }

    async fn route_button(&self, inbound: &Inbound, callback_id: &str, data: &str) {
        let handler = parse_selection(data)
            .and_then(|parsed| Some((self.registry.resolve(&parsed.token)?, parsed.argument)));
        let Some((handler, argument)) = handler else {
            debug!(data, "Ignoring unknown button");
            self.answer(callback_id, None, false).await;
            return;
        };

        let reply = self
            .invoke(handler, Invocation::Select, argument, inbound)
            .await;

        match (&reply, inbound.message_id) {
            (Reply::None, _) => {
                self.answer(callback_id, Some(EXPIRED_SELECTION_ALERT), true)
                    .await;
            }
            (_, Some(message_id)) => {
                self.answer(callback_id, None, false).await;
                self.edit_reply(inbound, message_id, reply).await;
            }
            (_, None) => {
                self.answer(callback_id, None, false).await;
                self.send_reply(inbound, reply).await;
            }
        }
    }

    async fn invoke(
        &self,
        handler: Arc<dyn Command>,
        invocation: Invocation,
        argument: Option<String>,
        inbound: &Inbound,
    ) -> Reply {
        let ctx = CommandContext {
            invocation,
            argument,
            key: inbound.key.clone(),
            user_name: inbound.user_name.clone(),
            session: self.sessions.get(&inbound.key).await,
            sessions: &self.sessions,
            services: &self.services,
            registry: &self.registry,
        };

        info!(
            command = handler.name(),
            invocation = ?invocation,
            user_id = %inbound.key.user_id,
            chat_id = inbound.key.chat_id,
            "Dispatching command"
        );

        match handler.execute(&ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(command = handler.name(), "Command failed: {}", e);
                self.sessions.clear(&inbound.key).await;
                match handler.usage() {
                    Some(usage) => Reply::text(format!("{}\n\n💡 Usage:\n{}", RECOVERY_REPLY, usage)),
                    None => Reply::text(RECOVERY_REPLY),
                }
            }
        }
    }

    async fn send_reply(&self, inbound: &Inbound, reply: Reply) {
        let chat_id = inbound.key.chat_id;
        let result = match reply {
            Reply::None => return,
            Reply::Text(text) => self.transport.send_message(chat_id, &text, None).await,
            Reply::Keyboard { text, keyboard } => {
                self.transport
                    .send_message(chat_id, &text, Some(keyboard))
                    .await
            }
        };
        if let Err(e) = result {
            warn!(chat_id, "Failed to send reply: {:#}", e);
        }
    }

    async fn edit_reply(&self, inbound: &Inbound, message_id: i64, reply: Reply) {
        let chat_id = inbound.key.chat_id;
        let result = match reply {
            Reply::None => return,
            Reply::Text(text) => {
                self.transport
                    .edit_message(chat_id, message_id, &text, None)
                    .await
            }
            Reply::Keyboard { text, keyboard } => {
                self.transport
                    .edit_message(chat_id, message_id, &text, Some(keyboard))
                    .await
            }
        };
        if let Err(e) = result {
            warn!(chat_id, message_id, "Failed to edit message: {:#}", e);
        }
    }

    async fn answer(&self, callback_id: &str, text: Option<&str>, show_alert: bool) {
        if let Err(e) = self
            .transport
            .answer_callback(callback_id, text, show_alert)
            .await
        {
            warn!(callback_id, "Failed to answer callback: {:#}", e);
        }
    }

    /// Consumes the event bus until it closes. Each event runs on its own
    /// task, at most [`MAX_INBOUND_CONCURRENCY`] at once. Events of one
    /// (user, chat) pair are chained: each task waits for the previous one
    /// of its pair before taking a permit, so arrival order is kept.
    pub async fn run(self: Arc<Self>, mut inbound_rx: broadcast::Receiver<Envelope>) {
        let semaphore = Arc::new(Semaphore::new(MAX_INBOUND_CONCURRENCY));
        let mut tails: HashMap<SessionKey, JoinHandle<()>> = HashMap::new();
        info!("Dispatcher started");

        loop {
            match inbound_rx.recv().await {
                Ok(envelope) => {
                    let Some(inbound) = Inbound::from_envelope(&envelope) else {
                        debug!(trace_id = %envelope.trace_id, "Dropping envelope without chat id");
                        continue;
                    };
                    let dispatcher = Arc::clone(&self);
                    let semaphore = Arc::clone(&semaphore);
                    let trace_id = envelope.trace_id.clone();
                    let key = inbound.key.clone();

                    tails.retain(|_, tail| !tail.is_finished());
                    let previous = tails.remove(&key);

                    let tail = tokio::spawn(async move {
                        if let Some(previous) = previous {
                            if let Err(e) = previous.await {
                                warn!("Previous event of this chat did not finish: {}", e);
                            }
                        }
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(err) => {
                                error!(
                                    "Inbound worker semaphore closed (trace_id={}): {}",
                                    trace_id, err
                                );
                                return;
                            }
                        };
                        dispatcher.dispatch(inbound).await;
                    });
                    tails.insert(key, tail);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event bus closed, stopping dispatcher");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event bus lagged by {} messages", n);
                }
            }
        }
    }
}

//! Friday Telegram Adapter
//!
//! Telegram Bot API long-polling with offset persistence, client recreation,
//! inline keyboards, callback queries and message chunking

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use friday_config::{telegram_account_tag, TelegramConfig};
use friday_ipc::{Envelope, EventBus, InlineKeyboard, MenuEntry, MessageKind, Transport};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};

const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const POLL_BACKOFF_START: Duration = Duration::from_secs(2);
const POLL_BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub text: Option<String>,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl TelegramUser {
    /// Name shown back to the user: the handle if set, else the first name.
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| self.first_name.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Identity reported by `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

pub struct TelegramAdapter {
    client: Client,
    bot_token: String,
    account_tag: String,
    allowed_chats: Option<HashSet<i64>>,
    api_url: String,
    data_dir: PathBuf,
    poll_timeout_secs: u64,
    client_recreate_interval_secs: u64,
    request_timeout_secs: u64,
    event_bus: Option<EventBus>,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig, data_dir: PathBuf) -> Result<Self> {
        let request_timeout_secs = config.request_timeout_secs.unwrap_or(30);
        let client = Self::build_client(Duration::from_secs(request_timeout_secs))?;

        Ok(Self {
            client,
            bot_token: config.bot_token.clone(),
            account_tag: telegram_account_tag(&config.bot_token),
            allowed_chats: config
                .allowed_chats
                .clone()
                .map(|items| items.into_iter().collect()),
            api_url: format!("{}/bot{}", TELEGRAM_API_BASE, config.bot_token),
            data_dir,
            poll_timeout_secs: config.poll_timeout_secs.unwrap_or(60),
            client_recreate_interval_secs: config.client_recreate_interval_secs.unwrap_or(60),
            request_timeout_secs,
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Points the adapter at another Bot API host.
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_url = format!("{}/bot{}", base.trim_end_matches('/'), self.bot_token);
        self
    }

    pub fn account_tag(&self) -> &str {
        &self.account_tag
    }

    fn build_client(timeout: Duration) -> Result<Client> {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Telegram HTTP client")
    }

    // Long polls hold the request open for `poll_timeout_secs`.
    fn build_poll_client(&self) -> Result<Client> {
        Self::build_client(Duration::from_secs(
            self.poll_timeout_secs + self.request_timeout_secs,
        ))
    }

    fn offset_path(&self) -> PathBuf {
        self.data_dir
            .join("runtime")
            .join(format!("telegram.{}.offset", self.account_tag))
    }

    fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&chat_id))
    }

    async fn read_offset(&self) -> Option<i64> {
        let content = fs::read_to_string(self.offset_path()).await.ok()?;
        content.trim().parse().ok()
    }

    async fn write_offset(&self, offset: i64) {
        let path = self.offset_path();
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                warn!("Failed to create runtime dir {}: {}", parent.display(), e);
                return;
            }
        }
        if let Err(e) = fs::write(&path, format!("{}\n", offset)).await {
            warn!("Failed to persist Telegram offset: {}", e);
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        client: &Client,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_url, method);
        let resp = client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {} request failed: {}", method, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("telegram {} HTTP {}: {}", method, status, body));
        }

        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram {} decode failed: {}", method, e))?;
        if !parsed.ok {
            return Err(anyhow!(
                "telegram {} returned ok=false: {}",
                method,
                parsed.description.unwrap_or_default()
            ));
        }
        parsed
            .result
            .ok_or_else(|| anyhow!("telegram {} returned no result", method))
    }

    pub async fn get_me(&self) -> Result<BotIdentity> {
        self.call(&self.client, "getMe", &serde_json::json!({})).await
    }

    pub async fn get_updates(
        &self,
        client: &Client,
        offset: Option<i64>,
    ) -> Result<Vec<TelegramUpdate>> {
        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }

        self.call(client, "getUpdates", &payload).await
    }

    fn keyboard_markup(keyboard: &InlineKeyboard) -> serde_json::Value {
        serde_json::json!({
            "inline_keyboard": keyboard.iter().map(|row| {
                row.iter().map(|btn| serde_json::json!({
                    "text": btn.text,
                    "callback_data": btn.callback_data
                })).collect::<Vec<_>>()
            }).collect::<Vec<_>>()
        })
    }

    pub async fn send_chunked(
        &self,
        chat_id: i64,
        text: &str,
        inline_keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        let chunks = chunk_message(text);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let mut payload = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
                "parse_mode": "Markdown",
            });
            if i == last {
                if let Some(keyboard) = inline_keyboard {
                    payload["reply_markup"] = Self::keyboard_markup(keyboard);
                }
            }

            self.send_with_markdown_fallback("sendMessage", payload).await?;
        }

        Ok(())
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        inline_keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        // editMessageText cannot be chunked: send a new message instead.
        if text.chars().count() > TELEGRAM_MAX_MESSAGE_LEN {
            return self.send_chunked(chat_id, text, inline_keyboard).await;
        }

        let mut payload = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(keyboard) = inline_keyboard {
            payload["reply_markup"] = Self::keyboard_markup(keyboard);
        }

        self.send_with_markdown_fallback("editMessageText", payload)
            .await
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        let mut payload = serde_json::json!({
            "callback_query_id": callback_query_id,
        });
        if let Some(t) = text {
            payload["text"] = serde_json::json!(t);
            payload["show_alert"] = serde_json::json!(show_alert);
        }

        self.call::<serde_json::Value>(&self.client, "answerCallbackQuery", &payload)
            .await
            .map(|_| ())
    }

    async fn send_with_markdown_fallback(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        match self
            .call::<serde_json::Value>(&self.client, method, &payload)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => warn!(
                "telegram {} rejected Markdown payload, retrying without parse_mode: {}",
                method, e
            ),
        }

        let mut fallback_payload = payload;
        if let Some(obj) = fallback_payload.as_object_mut() {
            obj.remove("parse_mode");
        }

        self.call::<serde_json::Value>(&self.client, method, &fallback_payload)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("{} (plain-text fallback)", e))
    }

    pub async fn sync_bot_commands(&self, entries: &[MenuEntry]) -> Result<()> {
        let payload = serde_json::json!({ "commands": menu_payload(entries) });
        self.call::<serde_json::Value>(&self.client, "setMyCommands", &payload)
            .await
            .map(|_| ())
    }

    /// Long-polls until the task is dropped. Transport errors back off
    /// exponentially and never end the loop.
    pub async fn poll(&self) -> Result<()> {
        let mut offset: Option<i64> = self.read_offset().await;
        info!(offset = ?offset, account = %self.account_tag, "Telegram polling started");

        let mut client = self.build_poll_client()?;
        let recreate_every = Duration::from_secs(self.client_recreate_interval_secs);
        let mut client_recreate_at = Instant::now() + recreate_every;
        let mut backoff = POLL_BACKOFF_START;

        loop {
            if Instant::now() >= client_recreate_at {
                debug!("Recreating HTTP client to prevent stale connections");
                match self.build_poll_client() {
                    Ok(fresh) => client = fresh,
                    Err(e) => warn!("Keeping previous HTTP client: {:#}", e),
                }
                client_recreate_at = Instant::now() + recreate_every;
            }

            let updates = match self.get_updates(&client, offset).await {
                Ok(v) => {
                    backoff = POLL_BACKOFF_START;
                    v
                }
                Err(err) => {
                    warn!(retry_in_secs = backoff.as_secs(), "Telegram polling error: {}", err);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(POLL_BACKOFF_MAX);
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);
                self.write_offset(update.update_id + 1).await;

                if let Some(message) = &update.message {
                    self.handle_message(message);
                }
                if let Some(callback) = &update.callback_query {
                    self.handle_callback(callback);
                }
            }
        }
    }

    fn publish(&self, envelope: Envelope) {
        match &self.event_bus {
            Some(event_bus) => {
                if let Err(e) = event_bus.publish(envelope) {
                    warn!("Failed to publish to event bus: {}", e);
                }
            }
            None => info!("No event bus configured, update not forwarded"),
        }
    }

    fn handle_message(&self, message: &TelegramMessage) {
        let chat_id = message.chat.id;
        if !self.is_chat_allowed(chat_id) {
            info!("Skipping message from unauthorized chat {}", chat_id);
            return;
        }
        let Some(text) = message.text.clone() else {
            debug!(chat_id, "Ignoring non-text message");
            return;
        };
        let Some(from) = message.from.as_ref() else {
            debug!(chat_id, "Ignoring message without sender");
            return;
        };

        info!(chat_id, from = from.id, "Received message: {}", text);

        let envelope = Envelope::new(
            "telegram",
            MessageKind::Message {
                from: from.id.to_string(),
                text,
            },
        )
        .with_chat_id(chat_id)
        .with_message_id(message.message_id)
        .with_payload(inbound_payload(from, &message.chat.chat_type));

        self.publish(envelope);
    }

    // The dispatcher answers the callback itself, since the answer depends
    // on whether the flow is still alive.
    fn handle_callback(&self, callback: &TelegramCallbackQuery) {
        let Some(message) = callback.message.as_ref() else {
            debug!(query_id = %callback.id, "Ignoring callback without source message");
            return;
        };
        let chat_id = message.chat.id;
        if !self.is_chat_allowed(chat_id) {
            info!("Skipping callback from unauthorized chat {}", chat_id);
            return;
        }

        info!(chat_id, data = ?callback.data, "Received callback query");

        let envelope = Envelope::new(
            "telegram",
            MessageKind::Callback {
                from: callback.from.id.to_string(),
                query_id: callback.id.clone(),
                data: callback.data.clone().unwrap_or_default(),
            },
        )
        .with_chat_id(chat_id)
        .with_message_id(message.message_id)
        .with_payload(inbound_payload(&callback.from, &message.chat.chat_type));

        self.publish(envelope);
    }
}

#[async_trait]
impl Transport for TelegramAdapter {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.send_chunked(chat_id, text, keyboard.as_ref()).await
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.edit_message_text(chat_id, message_id, text, keyboard.as_ref())
            .await
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        self.answer_callback_query(callback_id, text, show_alert)
            .await
    }

    async fn set_command_menu(&self, entries: &[MenuEntry]) -> Result<()> {
        self.sync_bot_commands(entries).await
    }
}

fn inbound_payload(from: &TelegramUser, chat_type: &str) -> serde_json::Value {
    serde_json::json!({
        "user_name": from.display_name(),
        "chat_type": chat_type,
        "from_user_id": from.id,
    })
}

fn menu_payload(entries: &[MenuEntry]) -> serde_json::Value {
    serde_json::Value::Array(
        entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "command": entry.command.trim_start_matches('/'),
                    "description": entry.description,
                })
            })
            .collect(),
    )
}

/// Splits `text` into pieces of at most 4096 characters, preferring to
/// break after whitespace or sentence punctuation.
pub fn chunk_message(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= TELEGRAM_MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + TELEGRAM_MAX_MESSAGE_LEN).min(chars.len());

        if end < chars.len() {
            if let Some(i) = (start..end)
                .rev()
                .find(|&i| matches!(chars[i], '\n' | ' ' | '.' | '!' | '?'))
            {
                end = i + 1;
            }
        }

        chunks.push(chars[start..end].iter().collect::<String>());
        start = end;
    }

    chunks
}

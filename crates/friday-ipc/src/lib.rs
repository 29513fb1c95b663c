//! Friday IPC
//!
//! Event bus for adapter-to-core communication and the outbound transport seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

fn default_schema_version() -> u16 {
    1
}

fn default_trace_id() -> String {
    generate_trace_id()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(default = "default_trace_id")]
    pub trace_id: String,
    pub channel: String,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageKind {
    #[serde(rename = "message")]
    Message { from: String, text: String },

    #[serde(rename = "callback")]
    Callback {
        from: String,
        query_id: String,
        data: String,
    },
}

impl MessageKind {
    /// Opaque identity of the sender as reported by the transport.
    pub fn sender(&self) -> &str {
        match self {
            MessageKind::Message { from, .. } | MessageKind::Callback { from, .. } => from,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

pub type InlineKeyboard = Vec<Vec<InlineButton>>;

/// One entry of the command menu shown by the chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub command: String,
    pub description: String,
}

impl Envelope {
    pub fn new(channel: &str, kind: MessageKind) -> Self {
        Self {
            schema_version: default_schema_version(),
            trace_id: generate_trace_id(),
            channel: channel.to_string(),
            kind,
            payload: serde_json::json!({}),
            chat_id: None,
            message_id: None,
        }
    }

    pub fn with_chat_id(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn user_name(&self) -> Option<&str> {
        self.payload
            .get("user_name")
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn chat_type(&self) -> Option<&str> {
        self.payload.get("chat_type").and_then(|value| value.as_str())
    }
}

/// Outbound side of a chat transport.
///
/// Every call is a single request to the remote service. Implementations bound
/// their own request time and report failures as errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> anyhow::Result<()>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> anyhow::Result<()>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> anyhow::Result<()>;

    async fn set_command_menu(&self, entries: &[MenuEntry]) -> anyhow::Result<()>;
}

pub type SharedTransport = Arc<dyn Transport>;

pub const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { inbound: inbound_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    pub fn publish(&self, envelope: Envelope) -> anyhow::Result<()> {
        self.inbound.send(envelope)?;
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> MessageKind {
        MessageKind::Message {
            from: "7".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn envelope_has_schema_version_and_trace_id() {
        let env = Envelope::new("test", message("hello"));
        assert_eq!(env.schema_version, 1);
        assert!(env.trace_id.starts_with("trace-"));
    }

    #[test]
    fn trace_id_different_for_each_envelope() {
        let env1 = Envelope::new("test", message("a"));
        let env2 = Envelope::new("test", message("b"));
        assert_ne!(env1.trace_id, env2.trace_id);
    }

    #[test]
    fn deserialize_callback_without_optional_fields() {
        let json = r#"{
            "channel": "telegram",
            "kind": {"type": "callback", "from": "7", "query_id": "q1", "data": "weather_select_2"},
            "payload": {"user_name": "ada"},
            "chat_id": 123,
            "message_id": 456
        }"#;
        let env: Envelope = serde_json::from_str(json).expect("deserialize");
        assert_eq!(env.schema_version, 1);
        assert_eq!(env.kind.sender(), "7");
        assert_eq!(env.user_name(), Some("ada"));
        assert_eq!(env.message_id, Some(456));
    }

    #[test]
    fn empty_user_name_is_absent() {
        let env = Envelope::new("test", message("hi"))
            .with_payload(serde_json::json!({ "user_name": "", "chat_type": "private" }));
        assert_eq!(env.user_name(), None);
        assert_eq!(env.chat_type(), Some("private"));
    }

    #[tokio::test]
    async fn published_envelopes_reach_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Envelope::new("test", message("ping")).with_chat_id(9))
            .expect("publish");
        let received = rx.recv().await.expect("recv");
        assert_eq!(received.chat_id, Some(9));
    }

    #[test]
    fn publish_without_subscribers_fails() {
        let bus = EventBus::new();
        assert!(bus.publish(Envelope::new("test", message("ping"))).is_err());
    }
}

//! Per-(user, chat) conversation state.
//!
//! A session is the record of one multi-step command in progress. It expires
//! `ttl` after its last write; reads treat an expired session as absent and
//! drop it, and a background sweep removes the ones nobody reads again.

use friday_weather::GeoCandidate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub chat_id: i64,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, chat_id: i64) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id,
        }
    }
}

/// Candidates of an ambiguous weather lookup, kept until the user picks one.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherFlow {
    pub search_term: String,
    pub candidates: Vec<GeoCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum FlowData {
    #[default]
    Empty,
    Weather(WeatherFlow),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub command: String,
    pub step: u32,
    pub data: FlowData,
    pub touched_at: Instant,
}

/// Fields to merge into an existing session.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub command: Option<String>,
    pub step: Option<u32>,
    pub data: Option<FlowData>,
}

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.duration_since(session.touched_at) > self.ttl
    }

    pub async fn set(&self, key: &SessionKey, command: &str, step: u32, data: FlowData) {
        let session = Session {
            command: command.to_string(),
            step,
            data,
            touched_at: Instant::now(),
        };
        self.sessions.lock().await.insert(key.clone(), session);
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        let expired = self.is_expired(sessions.get(key)?, Instant::now());
        if expired {
            sessions.remove(key);
            debug!(user_id = %key.user_id, chat_id = key.chat_id, "Session expired");
            return None;
        }
        sessions.get(key).cloned()
    }

    /// Merges `patch` and refreshes the timestamp. Absent or expired
    /// sessions are left alone.
    pub async fn update(&self, key: &SessionKey, patch: SessionPatch) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(key) else {
            return;
        };
        if self.is_expired(session, now) {
            sessions.remove(key);
            return;
        }

        if let Some(command) = patch.command {
            session.command = command;
        }
        if let Some(step) = patch.step {
            session.step = step;
        }
        if let Some(data) = patch.data {
            session.data = data;
        }
        session.touched_at = now;
    }

    pub async fn clear(&self, key: &SessionKey) {
        self.sessions.lock().await.remove(key);
    }

    /// Drops every expired session and returns how many went.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = self.sweep().await;
                if removed > 0 {
                    debug!(removed, "Expired sessions swept");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    fn key() -> SessionKey {
        SessionKey::new("42", 7)
    }

    #[tokio::test(start_paused = true)]
    async fn session_survives_until_ttl() {
        let store = SessionStore::new(TTL);
        store.set(&key(), "/weather", 1, FlowData::Empty).await;

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        let session = store.get(&key()).await.expect("still alive");
        assert_eq!(session.command, "/weather");
        assert_eq!(session.step, 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(store.get(&key()).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn update_merges_and_refreshes() {
        let store = SessionStore::new(TTL);
        store.set(&key(), "/weather", 1, FlowData::Empty).await;

        tokio::time::advance(Duration::from_secs(200)).await;
        store
            .update(
                &key(),
                SessionPatch {
                    step: Some(2),
                    ..Default::default()
                },
            )
            .await;

        tokio::time::advance(Duration::from_secs(200)).await;
        let session = store.get(&key()).await.expect("refreshed");
        assert_eq!(session.step, 2);
        assert_eq!(session.command, "/weather");
    }

    #[tokio::test]
    async fn update_without_session_is_noop() {
        let store = SessionStore::new(TTL);
        store
            .update(
                &key(),
                SessionPatch {
                    step: Some(3),
                    ..Default::default()
                },
            )
            .await;
        assert!(store.get(&key()).await.is_none());
    }

    #[tokio::test]
    async fn set_replaces_and_clear_removes() {
        let store = SessionStore::new(TTL);
        store.set(&key(), "/weather", 1, FlowData::Empty).await;
        store.set(&key(), "/other", 4, FlowData::Empty).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&key()).await.map(|s| s.step), Some(4));

        store.clear(&key()).await;
        store.clear(&key()).await;
        assert!(store.get(&key()).await.is_none());
    }

    #[tokio::test]
    async fn keys_are_independent_per_chat() {
        let store = SessionStore::new(TTL);
        store.set(&SessionKey::new("42", 1), "/weather", 1, FlowData::Empty).await;
        assert!(store.get(&SessionKey::new("42", 2)).await.is_none());
        assert!(store.get(&SessionKey::new("43", 1)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired() {
        let store = SessionStore::new(TTL);
        store.set(&SessionKey::new("old", 1), "/weather", 1, FlowData::Empty).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        store.set(&SessionKey::new("new", 1), "/weather", 1, FlowData::Empty).await;
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&SessionKey::new("new", 1)).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_purges_in_background() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(10)));
        store.set(&key(), "/weather", 1, FlowData::Empty).await;
        let handle = store.clone().spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(store.len().await, 0);
        handle.abort();
    }
}

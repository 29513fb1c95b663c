#![allow(dead_code)]

use async_trait::async_trait;
use friday_core::{default_registry, CommandRegistry, Dispatcher, Inbound, InboundEvent, Services};
use friday_core::{SessionKey, SessionStore};
use friday_cron::SingleFlight;
use friday_ipc::{InlineKeyboard, MenuEntry, Transport};
use friday_rss::{FeedCheck, FeedFetcher, FeedIngestor, FetchError, Notifier, ParsedFeed};
use friday_storage::{SharedStorage, Storage};
use friday_weather::{Conditions, GeoCandidate, WeatherError, WeatherProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

pub const USER: &str = "42";
pub const CHAT: i64 = 7;

pub fn place(name: &str, country: &str) -> GeoCandidate {
    GeoCandidate {
        name: name.to_string(),
        lat: 37.5665,
        lon: 126.978,
        country: country.to_string(),
        local_name: None,
    }
}

#[derive(Default)]
pub struct FakeWeather {
    places: StdMutex<HashMap<String, Vec<GeoCandidate>>>,
}

impl FakeWeather {
    pub fn knows(&self, query: &str, places: Vec<GeoCandidate>) {
        self.places
            .lock()
            .expect("lock")
            .insert(query.to_lowercase(), places);
    }
}

#[async_trait]
impl WeatherProvider for FakeWeather {
    async fn geocode(&self, query: &str) -> Result<Vec<GeoCandidate>, WeatherError> {
        Ok(self
            .places
            .lock()
            .expect("lock")
            .get(&query.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn current(&self, _lat: f64, _lon: f64) -> Result<Conditions, WeatherError> {
        Ok(Conditions {
            main: "Clouds".to_string(),
            description: "broken clouds".to_string(),
            temp: 18.0,
            feels_like: 17.2,
            humidity: 64,
        })
    }
}

struct NoFeeds;

#[async_trait]
impl FeedFetcher for NoFeeds {
    async fn fetch(&self, _url: &str) -> Result<ParsedFeed, FetchError> {
        Err(FetchError::Status(404))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Sent {
        chat_id: i64,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    Edited {
        chat_id: i64,
        message_id: i64,
        text: String,
    },
    Answered {
        callback_id: String,
        text: Option<String>,
        show_alert: bool,
    },
}

#[derive(Default)]
pub struct RecordingTransport {
    log: StdMutex<Vec<Outbound>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.log.lock().expect("lock"))
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().expect("lock").is_empty()
    }

    pub fn len(&self) -> usize {
        self.log.lock().expect("lock").len()
    }

    /// Waits until at least `count` outbound calls were recorded, then drains them.
    pub async fn wait_for(&self, count: usize) -> Vec<Outbound> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("outbound calls in time");
        self.take()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> anyhow::Result<()> {
        self.log.lock().expect("lock").push(Outbound::Sent {
            chat_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        _keyboard: Option<InlineKeyboard>,
    ) -> anyhow::Result<()> {
        self.log.lock().expect("lock").push(Outbound::Edited {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> anyhow::Result<()> {
        self.log.lock().expect("lock").push(Outbound::Answered {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            show_alert,
        });
        Ok(())
    }

    async fn set_command_menu(&self, _entries: &[MenuEntry]) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub storage: SharedStorage,
    pub weather: Arc<FakeWeather>,
    pub transport: Arc<RecordingTransport>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(default_registry())
    }

    pub fn with_registry(registry: CommandRegistry) -> Self {
        let storage = Storage::in_memory().expect("storage").into_shared();
        let weather = Arc::new(FakeWeather::default());
        let transport = Arc::new(RecordingTransport::default());

        let ingestor = FeedIngestor::new(storage.clone(), Arc::new(NoFeeds), Duration::from_secs(5));
        let notifier = Notifier::new(
            storage.clone(),
            storage.clone(),
            transport.clone(),
            Duration::from_secs(5),
        );
        let services = Services {
            users: storage.clone(),
            feeds: storage.clone(),
            weather: weather.clone(),
            weather_units: "metric".to_string(),
            feed_check: Arc::new(FeedCheck::new(ingestor, notifier)),
            check_guard: Arc::new(SingleFlight::new()),
        };
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            Arc::new(SessionStore::new(Duration::from_secs(300))),
            services,
            transport.clone(),
        ));

        Self {
            storage,
            weather,
            transport,
            dispatcher,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(USER, CHAT)
    }

    pub fn sessions(&self) -> &SessionStore {
        self.dispatcher.sessions()
    }

    pub async fn say(&self, text: &str) {
        self.dispatcher
            .dispatch(Inbound::text(USER, CHAT, "ada", text))
            .await;
    }

    pub async fn press(&self, data: &str, message_id: Option<i64>) {
        self.dispatcher
            .dispatch(Inbound {
                key: self.key(),
                user_name: "ada".to_string(),
                message_id,
                event: InboundEvent::Button {
                    callback_id: "cb-1".to_string(),
                    data: data.to_string(),
                },
            })
            .await;
    }

    /// Text of the single message sent since the last call.
    pub fn reply(&self) -> String {
        match self.transport.take().as_slice() {
            [Outbound::Sent { text, .. }] => text.clone(),
            other => panic!("expected exactly one sent message, got {:?}", other),
        }
    }
}

use async_trait::async_trait;
use friday_cron::SingleFlight;
use friday_ipc::{InlineKeyboard, MenuEntry, Transport};
use friday_rss::{FeedCheck, FeedFetcher, FeedIngestor, FetchError, Notifier, ParsedFeed};
use friday_storage::{SharedStorage, Storage};
use friday_weather::{Conditions, GeoCandidate, WeatherError, WeatherProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::command::{CommandContext, Invocation, Services};
use crate::registry::CommandRegistry;
use crate::session::{SessionKey, SessionStore};

pub(crate) fn place(name: &str, country: &str) -> GeoCandidate {
    GeoCandidate {
        name: name.to_string(),
        lat: 37.5665,
        lon: 126.978,
        country: country.to_string(),
        local_name: None,
    }
}

#[derive(Default)]
pub(crate) struct FakeWeather {
    pub(crate) places: StdMutex<HashMap<String, Vec<GeoCandidate>>>,
    pub(crate) error: StdMutex<Option<fn() -> WeatherError>>,
}

impl FakeWeather {
    pub(crate) fn knows(&self, query: &str, places: Vec<GeoCandidate>) {
        self.places
            .lock()
            .expect("lock")
            .insert(query.to_lowercase(), places);
    }

    pub(crate) fn fail_with(&self, make_error: fn() -> WeatherError) {
        *self.error.lock().expect("lock") = Some(make_error);
    }
}

#[async_trait]
impl WeatherProvider for FakeWeather {
    async fn geocode(&self, query: &str) -> Result<Vec<GeoCandidate>, WeatherError> {
        if let Some(make_error) = *self.error.lock().expect("lock") {
            return Err(make_error());
        }
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
            main: "Clear".to_string(),
            description: "clear sky".to_string(),
            temp: 21.4,
            feels_like: 20.6,
            humidity: 40,
        })
    }
}

#[derive(Default)]
pub(crate) struct StaticFetcher {
    pub(crate) documents: StdMutex<HashMap<String, ParsedFeed>>,
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        self.documents
            .lock()
            .expect("lock")
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub(crate) sent: StdMutex<Vec<(i64, String)>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        _keyboard: Option<InlineKeyboard>,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .expect("lock")
            .push((chat_id, text.to_string()));
        Ok(())
    }

    async fn edit_message(
        &self,
        _chat_id: i64,
        _message_id: i64,
        _text: &str,
        _keyboard: Option<InlineKeyboard>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn answer_callback(
        &self,
        _callback_id: &str,
        _text: Option<&str>,
        _show_alert: bool,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_command_menu(&self, _entries: &[MenuEntry]) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) struct Fixture {
    pub(crate) storage: SharedStorage,
    pub(crate) weather: Arc<FakeWeather>,
    pub(crate) fetcher: Arc<StaticFetcher>,
    pub(crate) transport: Arc<RecordingTransport>,
    pub(crate) sessions: SessionStore,
    pub(crate) services: Services,
    pub(crate) registry: CommandRegistry,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let storage = Storage::in_memory().expect("storage").into_shared();
        let weather = Arc::new(FakeWeather::default());
        let fetcher = Arc::new(StaticFetcher::default());
        let transport = Arc::new(RecordingTransport::default());

        let ingestor = FeedIngestor::new(storage.clone(), fetcher.clone(), Duration::from_secs(5));
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

        Self {
            storage,
            weather,
            fetcher,
            transport,
            sessions: SessionStore::new(Duration::from_secs(300)),
            services,
            registry: super::default_registry(),
        }
    }

    pub(crate) fn key(&self) -> SessionKey {
        SessionKey::new("42", 7)
    }

    pub(crate) async fn ctx(
        &self,
        invocation: Invocation,
        argument: Option<&str>,
    ) -> CommandContext<'_> {
        CommandContext {
            invocation,
            argument: argument.map(str::to_string),
            key: self.key(),
            user_name: "ada".to_string(),
            session: self.sessions.get(&self.key()).await,
            sessions: &self.sessions,
            services: &self.services,
            registry: &self.registry,
        }
    }
}

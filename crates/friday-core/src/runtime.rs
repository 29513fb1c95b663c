use anyhow::{Context, Result};
use friday_config::Config;
use friday_cron::{Scheduler, SingleFlight};
use friday_ipc::{EventBus, SharedTransport, Transport};
use friday_rss::{CheckSummary, FeedCheck, FeedIngestor, HttpFeedFetcher, Notifier};
use friday_storage::{SharedStorage, Storage};
use friday_telegram::TelegramAdapter;
use friday_weather::OpenWeatherClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::command::Services;
use crate::commands::default_registry;
use crate::dispatcher::Dispatcher;
use crate::session::SessionStore;

pub struct FridayRuntime {
    config: Config,
    data_dir: PathBuf,
    storage: SharedStorage,
    event_bus: EventBus,
    adapter: Arc<TelegramAdapter>,
    feed_check: Arc<FeedCheck>,
    check_guard: Arc<SingleFlight>,
    dispatcher: Arc<Dispatcher>,
}

impl FridayRuntime {
    pub fn new(config: Config, storage: Storage, data_dir: PathBuf) -> Result<Self> {
        let telegram = config.require_telegram()?;
        let event_bus = EventBus::new();
        let adapter = Arc::new(
            TelegramAdapter::new(telegram, data_dir.clone())?.with_event_bus(event_bus.clone()),
        );
        let transport: SharedTransport = adapter.clone();
        let storage = storage.into_shared();

        let weather = OpenWeatherClient::new(&config.weather)?;
        if !weather.is_configured() {
            warn!("No OpenWeather API key configured; /weather will report it as unavailable");
        }

        let fetch_timeout = Duration::from_secs(config.rss.fetch_timeout_secs);
        let fetcher = Arc::new(HttpFeedFetcher::new(fetch_timeout)?);
        let ingestor = FeedIngestor::new(storage.clone(), fetcher, fetch_timeout);
        let notifier = Notifier::new(
            storage.clone(),
            storage.clone(),
            transport.clone(),
            Duration::from_secs(config.rss.delivery_timeout_secs),
        );
        let feed_check = Arc::new(FeedCheck::new(ingestor, notifier));
        let check_guard = Arc::new(SingleFlight::new());

        let services = Services {
            users: storage.clone(),
            feeds: storage.clone(),
            weather: Arc::new(weather),
            weather_units: config.weather.units.clone(),
            feed_check: Arc::clone(&feed_check),
            check_guard: Arc::clone(&check_guard),
        };
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(
            config.session.ttl_secs,
        )));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(default_registry()),
            sessions,
            services,
            transport,
        ));

        Ok(Self {
            config,
            data_dir,
            storage,
            event_bus,
            adapter,
            feed_check,
            check_guard,
            dispatcher,
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn adapter(&self) -> &Arc<TelegramAdapter> {
        &self.adapter
    }

    /// One ingestion + fan-out pass, guarded like the scheduled runs.
    pub async fn check_once(&self) -> Result<Option<CheckSummary>> {
        match self.check_guard.run(self.feed_check.run_once()).await {
            Some(summary) => summary.map(Some),
            None => Ok(None),
        }
    }

    async fn register_default_feeds(&self) {
        for url in &self.config.rss.default_feeds {
            match self.feed_check.ingestor().register_feed(url).await {
                Ok(feed) => info!(feed_id = feed.id, url = %feed.url, "Default feed registered"),
                Err(e) => warn!(url = %url, "Failed to register default feed: {}", e),
            }
        }
    }

    async fn publish_command_menu(&self) {
        let menu = self.dispatcher.registry().menu();
        match self.adapter.set_command_menu(&menu).await {
            Ok(()) => info!(commands = menu.len(), "Command menu published"),
            Err(e) => warn!("Failed to publish command menu: {:#}", e),
        }
    }

    /// Runs until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        info!("Friday runtime starting...");

        self.register_default_feeds().await;
        self.publish_command_menu().await;

        // Subscribe before polling starts so no update is published into the void.
        let inbound_rx = self.event_bus.subscribe();
        let dispatcher_task = tokio::spawn(Arc::clone(&self.dispatcher).run(inbound_rx));

        let sweeper_task = Arc::clone(self.dispatcher.sessions())
            .spawn_sweeper(Duration::from_secs(self.config.session.sweep_interval_secs));

        let scheduler_task = if self.config.rss.enabled {
            let scheduler = Arc::new(
                Scheduler::new(
                    self.feed_check.clone(),
                    Duration::from_secs(self.config.rss.interval_secs),
                )
                .with_guard(Arc::clone(&self.check_guard)),
            );
            info!(
                interval_secs = self.config.rss.interval_secs,
                "RSS scheduler enabled"
            );
            Some(scheduler.spawn())
        } else {
            info!("RSS scheduler disabled");
            None
        };

        let adapter = Arc::clone(&self.adapter);
        let poll_task = tokio::spawn(async move {
            if let Err(e) = adapter.poll().await {
                error!("Telegram adapter failed: {:#}", e);
            }
        });

        info!(account = %self.adapter.account_tag(), "Friday runtime ready");
        let outcome = tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal");
        info!("Shutting down");

        poll_task.abort();
        if let Some(task) = scheduler_task {
            task.abort();
        }
        sweeper_task.abort();
        dispatcher_task.abort();
        outcome
    }
}

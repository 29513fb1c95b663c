//! Friday Configuration
//!
//! TOML configuration loading with environment variable support

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const WEATHER_API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub rss: RssConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub poll_timeout_secs: Option<u64>,
    pub client_recreate_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub allowed_chats: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    #[serde(default = "default_weather_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Language used to pick a localized city name from geocoding results.
    #[serde(default = "default_lang")]
    pub local_name_lang: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_weather_base_url(),
            timeout_secs: default_weather_timeout(),
            units: default_units(),
            lang: default_lang(),
            local_name_lang: default_lang(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rss_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_feeds")]
    pub default_feeds: Vec<String>,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_rss_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            delivery_timeout_secs: default_delivery_timeout(),
            default_feeds: default_feeds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

pub fn telegram_account_tag(bot_token: &str) -> String {
    let token = bot_token.trim();
    token.split(':').next().unwrap_or(token).trim().to_string()
}

fn default_true() -> bool {
    true
}

fn default_weather_base_url() -> String {
    "https://api.openweathermap.org".to_string()
}

fn default_weather_timeout() -> u64 {
    10
}

fn default_units() -> String {
    "metric".to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_rss_interval() -> u64 {
    600
}

fn default_fetch_timeout() -> u64 {
    20
}

fn default_delivery_timeout() -> u64 {
    10
}

fn default_feeds() -> Vec<String> {
    vec!["https://dev.to/feed".to_string()]
}

fn default_session_ttl() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Friday bot configuration

[core]
# data_dir = "~/.friday"
log_level = "info"

[telegram]
bot_token = "123456:replace-me"
poll_timeout_secs = 60
client_recreate_interval_secs = 60
# allowed_chats = [123456789]

[weather]
# api_key = "openweather-api-key"
units = "metric"
lang = "en"

[rss]
enabled = true
interval_secs = 600
default_feeds = ["https://dev.to/feed"]

[session]
ttl_secs = 300
sweep_interval_secs = 60
"#;

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("friday").join("config.toml"))
    }

    /// Secrets may be supplied through the environment instead of the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(TELEGRAM_TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            match &mut self.telegram {
                Some(telegram) => telegram.bot_token = token,
                None => {
                    self.telegram = Some(TelegramConfig {
                        bot_token: token,
                        ..Default::default()
                    })
                }
            }
        }

        if let Some(key) = lookup(WEATHER_API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.weather.api_key = Some(key);
        }
    }

    /// Returns the Telegram section, failing when the bot cannot start without it.
    pub fn require_telegram(&self) -> anyhow::Result<&TelegramConfig> {
        match &self.telegram {
            Some(telegram) if !telegram.bot_token.trim().is_empty() => Ok(telegram),
            _ => anyhow::bail!(
                "Telegram bot token is not configured (set [telegram].bot_token or {})",
                TELEGRAM_TOKEN_ENV
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(telegram) = &self.telegram {
            let token = telegram.bot_token.trim();
            if token.is_empty() {
                anyhow::bail!("telegram.bot_token cannot be empty");
            }
            if telegram_account_tag(token).is_empty() {
                anyhow::bail!("telegram.bot_token has invalid account tag");
            }
            if telegram.poll_timeout_secs == Some(0) {
                anyhow::bail!("telegram.poll_timeout_secs must be > 0");
            }
            if telegram.request_timeout_secs == Some(0) {
                anyhow::bail!("telegram.request_timeout_secs must be > 0");
            }
        }

        if self.weather.timeout_secs == 0 {
            anyhow::bail!("weather.timeout_secs must be > 0");
        }
        if url::Url::parse(&self.weather.base_url).is_err() {
            anyhow::bail!("weather.base_url '{}' is not a valid URL", self.weather.base_url);
        }
        if let Some(key) = &self.weather.api_key {
            if key.trim().is_empty() {
                anyhow::bail!("weather.api_key cannot be empty when set");
            }
        }

        if self.rss.interval_secs == 0 {
            anyhow::bail!("rss.interval_secs must be > 0");
        }
        if self.rss.fetch_timeout_secs == 0 {
            anyhow::bail!("rss.fetch_timeout_secs must be > 0");
        }
        if self.rss.delivery_timeout_secs == 0 {
            anyhow::bail!("rss.delivery_timeout_secs must be > 0");
        }
        let mut feed_urls = HashSet::new();
        for feed in &self.rss.default_feeds {
            let feed = feed.trim();
            match url::Url::parse(feed) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => anyhow::bail!("rss.default_feeds contains invalid URL '{}'", feed),
            }
            if !feed_urls.insert(feed.to_string()) {
                anyhow::bail!("Duplicate feed URL '{}' in rss.default_feeds", feed);
            }
        }

        if self.session.ttl_secs == 0 {
            anyhow::bail!("session.ttl_secs must be > 0");
        }
        if self.session.sweep_interval_secs == 0 {
            anyhow::bail!("session.sweep_interval_secs must be > 0");
        }

        Ok(())
    }
}

//! Friday Weather
//!
//! OpenWeather geocoding and current-conditions client

use async_trait::async_trait;
use friday_config::WeatherConfig;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Maximum number of places returned by a geocoding lookup.
pub const GEOCODE_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCandidate {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    pub local_name: Option<String>,
}

impl GeoCandidate {
    pub fn display_name(&self) -> &str {
        self.local_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conditions {
    /// Condition group such as `Clear`, `Rain` or `Snow`.
    pub main: String,
    pub description: String,
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("weather service is not configured")]
    NotConfigured,
    #[error("weather API key was rejected")]
    Unauthorized,
    #[error("location not found")]
    NotFound,
    #[error("weather request timed out")]
    Timeout,
    #[error("weather request failed: {0}")]
    Http(String),
    #[error("weather response decode failed: {0}")]
    Decode(String),
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Up to [`GEOCODE_LIMIT`] places matching `query`, best match first.
    async fn geocode(&self, query: &str) -> Result<Vec<GeoCandidate>, WeatherError>;

    async fn current(&self, lat: f64, lon: f64) -> Result<Conditions, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    country: String,
    #[serde(default)]
    local_names: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    weather: Vec<CurrentWeather>,
    main: CurrentMain,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct CurrentMain {
    temp: f64,
    feels_like: f64,
    humidity: i64,
}

pub struct OpenWeatherClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    units: String,
    lang: String,
    local_name_lang: String,
}

impl OpenWeatherClient {
    pub fn new(config: &WeatherConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()?;

        Ok(Self {
            client,
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            units: config.units.clone(),
            lang: config.lang.clone(),
            local_name_lang: config.local_name_lang.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, WeatherError> {
        self.api_key.as_deref().ok_or(WeatherError::NotConfigured)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, WeatherError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => return Err(WeatherError::Unauthorized),
            StatusCode::NOT_FOUND => return Err(WeatherError::NotFound),
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(WeatherError::Http(format!(
                    "HTTP {} at {}: {}",
                    status,
                    path,
                    truncate_for_error(&body, 200)
                )));
            }
            _ => {}
        }

        response
            .json::<T>()
            .await
            .map_err(|e| WeatherError::Decode(e.to_string()))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> WeatherError {
    if err.is_timeout() {
        WeatherError::Timeout
    } else {
        WeatherError::Http(err.to_string())
    }
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn geocode(&self, query: &str) -> Result<Vec<GeoCandidate>, WeatherError> {
        let api_key = self.api_key()?;
        let places: Vec<GeoResponse> = self
            .get_json(
                "/geo/1.0/direct",
                &[
                    ("q", query.to_string()),
                    ("limit", GEOCODE_LIMIT.to_string()),
                    ("appid", api_key.to_string()),
                ],
            )
            .await?;

        tracing::debug!(query, found = places.len(), "Geocoding finished");

        Ok(places
            .into_iter()
            .take(GEOCODE_LIMIT)
            .map(|mut place| GeoCandidate {
                local_name: place.local_names.remove(&self.local_name_lang),
                name: place.name,
                lat: place.lat,
                lon: place.lon,
                country: place.country,
            })
            .collect())
    }

    async fn current(&self, lat: f64, lon: f64) -> Result<Conditions, WeatherError> {
        let api_key = self.api_key()?;
        let response: CurrentResponse = self
            .get_json(
                "/data/2.5/weather",
                &[
                    ("lat", lat.to_string()),
                    ("lon", lon.to_string()),
                    ("appid", api_key.to_string()),
                    ("units", self.units.clone()),
                    ("lang", self.lang.clone()),
                ],
            )
            .await?;

        let first = response
            .weather
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::Decode("empty weather list".to_string()))?;

        Ok(Conditions {
            main: first.main,
            description: first.description,
            temp: response.main.temp,
            feels_like: response.main.feels_like,
            humidity: response.main.humidity,
        })
    }
}

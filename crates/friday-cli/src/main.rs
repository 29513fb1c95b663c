//! Friday CLI
//!
//! Command-line interface for the Friday Telegram bot

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use friday_config::{Config, DEFAULT_CONFIG_TEMPLATE};
use friday_core::FridayRuntime;
use friday_rss::{FeedIngestor, HttpFeedFetcher};
use friday_storage::{FeedRepository, Storage};
use friday_telegram::TelegramAdapter;
use friday_weather::{OpenWeatherClient, WeatherProvider};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DB_FILE: &str = "friday.db";
const REDACTED: &str = "***REDACTED***";

#[derive(Parser)]
#[command(name = "friday")]
#[command(about = "Telegram bot with weather lookups and RSS notifications", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides [core].log_level)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground until Ctrl-C
    Start,

    /// Run one feed check and notify subscribers
    Check,

    /// Manage RSS feeds
    Feeds {
        #[command(subcommand)]
        action: FeedCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Check connectivity to external services
    Test {
        #[command(subcommand)]
        action: TestCommands,
    },

    /// Log management
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },
}

#[derive(Subcommand)]
enum FeedCommands {
    /// List every known feed
    List,
    /// Fetch a feed and subscribe to it
    Add { url: String },
    /// Stop checking a feed (articles are kept)
    Remove { id: i64 },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a commented default configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show current configuration
    Show,
    /// Validate configuration
    Validate,
}

#[derive(Subcommand)]
enum TestCommands {
    /// Test the bot token against the Bot API
    Telegram,
    /// Look up a city with the weather API
    Weather {
        #[arg(default_value = "Seoul")]
        city: String,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Show log files and sizes
    List,
    /// Clean up old logs
    Clean {
        /// Keep only N days of logs
        #[arg(short, long, default_value_t = logging::LOG_RETENTION_DAYS)]
        days: u64,
    },
    /// Show last N lines of today's log
    Tail {
        /// Number of lines to show
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(cli.config.as_deref())?;
            let data_dir = get_data_dir(&config);
            fs::create_dir_all(&data_dir)?;
            let _logging_guard =
                logging::init_logging(&data_dir.join("logs"), &log_level(&cli.log_level, &config))?;

            let storage = Storage::new(data_dir.join(DB_FILE))?;
            let runtime = FridayRuntime::new(config, storage, data_dir)?;
            info!("Starting Friday in foreground...");
            runtime.run().await?;
        }

        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            let data_dir = get_data_dir(&config);
            fs::create_dir_all(&data_dir)?;
            let _logging_guard =
                logging::init_logging(&data_dir.join("logs"), &log_level(&cli.log_level, &config))?;

            let storage = Storage::new(data_dir.join(DB_FILE))?;
            let runtime = FridayRuntime::new(config, storage, data_dir)?;
            match runtime.check_once().await? {
                None => println!("A feed check is already running."),
                Some(summary) => {
                    println!("New articles: {}", summary.new_articles);
                    if let Some(report) = summary.fanout {
                        println!(
                            "Subscribers: {}  delivered: {}  failed: {}",
                            report.subscribers, report.delivered, report.failed
                        );
                    }
                }
            }
        }

        Commands::Feeds { action } => {
            let config = load_config(cli.config.as_deref())?;
            let data_dir = get_data_dir(&config);
            fs::create_dir_all(&data_dir)?;
            let storage = Storage::new(data_dir.join(DB_FILE))?;
            handle_feed_command(action, &config, storage).await?;
        }

        Commands::Config { action } => match action {
            ConfigCommands::Init { force } => {
                create_default_config(cli.config.as_deref(), force)?;
            }
            ConfigCommands::Show => {
                let config = load_config(cli.config.as_deref())?;
                println!("Current configuration:");
                print_redacted_config(&config)?;
            }
            ConfigCommands::Validate => {
                load_config(cli.config.as_deref()).context("Configuration is invalid")?;
                println!("Configuration is valid.");
            }
        },

        Commands::Test { action } => {
            let config = load_config(cli.config.as_deref())?;
            match action {
                TestCommands::Telegram => test_telegram(&config).await?,
                TestCommands::Weather { city } => test_weather(&config, &city).await?,
            }
        }

        Commands::Logs { action } => {
            let config = load_config(cli.config.as_deref())?;
            let manager = logging::LogManager::new(get_data_dir(&config).join("logs"));
            match action {
                LogCommands::List => {
                    let files = manager.get_log_files()?;
                    println!(
                        "Log files ({} total):\n",
                        logging::LogManager::format_size(manager.get_log_size()?)
                    );
                    for file in files {
                        let metadata = fs::metadata(&file)?;
                        let modified: chrono::DateTime<chrono::Local> = metadata.modified()?.into();
                        println!(
                            "  {} ({}, modified {})",
                            file.file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                            logging::LogManager::format_size(metadata.len()),
                            modified.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                LogCommands::Clean { days } => {
                    let deleted = manager.cleanup_old_logs(days)?;
                    println!("Cleaned {} old log file(s)", deleted);
                }
                LogCommands::Tail { lines } => {
                    let current_log = manager.get_current_log_path();
                    if current_log.exists() {
                        let content = fs::read_to_string(&current_log)?;
                        let all_lines: Vec<&str> = content.lines().collect();
                        let start = all_lines.len().saturating_sub(lines);
                        for line in &all_lines[start..] {
                            println!("{}", line);
                        }
                    } else {
                        println!("No log file found at {}", current_log.display());
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_feed_command(action: FeedCommands, config: &Config, mut storage: Storage) -> Result<()> {
    match action {
        FeedCommands::List => {
            let feeds = storage.list_feeds()?;
            if feeds.is_empty() {
                println!("No feeds registered.");
            }
            for feed in &feeds {
                println!(
                    "  [{}] {} {}\n      {}",
                    feed.id,
                    if feed.is_active { "●" } else { "○" },
                    feed.title,
                    feed.url
                );
            }
            println!("\nUnread articles: {}", storage.count_unprocessed_articles()?);
        }
        FeedCommands::Add { url } => {
            match url::Url::parse(&url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => anyhow::bail!("'{}' is not an http(s) URL", url),
            }
            let timeout = Duration::from_secs(config.rss.fetch_timeout_secs);
            let fetcher = Arc::new(HttpFeedFetcher::new(timeout)?);
            let ingestor = FeedIngestor::new(storage.into_shared(), fetcher, timeout);
            let feed = ingestor
                .register_feed(&url)
                .await
                .with_context(|| format!("failed to subscribe to {}", url))?;
            println!("Subscribed to '{}' (id {})", feed.title, feed.id);
        }
        FeedCommands::Remove { id } => {
            storage.deactivate_feed(id)?;
            println!("Feed {} deactivated.", id);
        }
    }
    Ok(())
}

fn config_path(config_path: Option<&str>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Config::default_path().context("could not determine the config directory"),
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let path = config_path(path)?;
    Config::load(&path).with_context(|| format!("failed to load config from {}", path.display()))
}

fn create_default_config(path: Option<&str>, force: bool) -> Result<()> {
    let path = config_path(path)?;
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;

    println!("Configuration created at: {}", path.display());
    println!("\nEdit the file to set [telegram].bot_token and, for /weather, [weather].api_key.");
    Ok(())
}

fn log_level(cli_level: &Option<String>, config: &Config) -> String {
    cli_level
        .clone()
        .or_else(|| config.core.log_level.clone())
        .unwrap_or_else(|| "info".to_string())
}

fn get_data_dir(config: &Config) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    match config.core.data_dir.as_deref() {
        Some("~") => home(),
        Some(dir) if dir.starts_with("~/") => home().join(dir.trim_start_matches("~/")),
        Some(dir) => PathBuf::from(dir),
        None => home().join(".friday"),
    }
}

fn redacted_config(config: &Config) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(config)?;

    if let Some(token) = value
        .get_mut("telegram")
        .and_then(|t| t.get_mut("bot_token"))
    {
        *token = json!(REDACTED);
    }
    if let Some(api_key) = value
        .get_mut("weather")
        .and_then(|w| w.get_mut("api_key"))
        .filter(|key| !key.is_null())
    {
        *api_key = json!(REDACTED);
    }
    Ok(value)
}

fn print_redacted_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&redacted_config(config)?)?);
    Ok(())
}

async fn test_telegram(config: &Config) -> Result<()> {
    let telegram = config.require_telegram()?;
    let adapter = TelegramAdapter::new(telegram, get_data_dir(config))?;

    println!("Testing bot {}...", adapter.account_tag());
    let me = adapter.get_me().await.context("Telegram getMe failed")?;
    println!(
        "✅ Connected as @{} (id {})",
        me.username.as_deref().unwrap_or("unknown"),
        me.id
    );
    Ok(())
}

async fn test_weather(config: &Config, city: &str) -> Result<()> {
    let client = OpenWeatherClient::new(&config.weather)?;
    if !client.is_configured() {
        anyhow::bail!("No weather API key configured ([weather].api_key)");
    }

    let places = client.geocode(city).await?;
    let Some(first) = places.first() else {
        println!("No places match '{}'.", city);
        return Ok(());
    };
    for (i, place) in places.iter().enumerate() {
        println!(
            "  {}. {} ({}) {:.4}, {:.4}",
            i + 1,
            place.display_name(),
            place.country,
            place.lat,
            place.lon
        );
    }

    let conditions = client.current(first.lat, first.lon).await?;
    println!(
        "✅ {}: {} ({}), {:.1}° feels like {:.1}°, humidity {}%",
        first.display_name(),
        conditions.main,
        conditions.description,
        conditions.temp,
        conditions.feels_like,
        conditions.humidity
    );
    Ok(())
}

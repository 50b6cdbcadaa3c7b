//! Configuration management for the rainfall watering advisor
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with RAINFALL__ prefix

use std::path::PathBuf;

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::services::decision::DecisionConfig;
use crate::services::features::FeatureWindow;
use crate::services::training::LabelConfig;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Record store configuration
    pub database: DatabaseConfig,

    /// Feature window and decision policy configuration
    pub model: ModelConfig,

    /// Scraped forecast and observation sources
    pub sources: SourcesConfig,

    /// Email notification configuration
    pub email: EmailConfig,

    /// Forecast chart output
    pub chart: ChartConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,

    /// Create the database file when it does not exist
    pub create_if_missing: bool,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

/// What the daily run does when fewer trailing days than required are stored
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InsufficientDataPolicy {
    /// Log and record no decision
    Skip,
    /// Decide from the days that are present
    #[default]
    Proceed,
    /// Abort the run with an error
    Fail,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    /// Decision policy name
    pub name: String,

    /// Model whose past decisions drive replay adjustment
    pub replay_model: String,

    pub hist_days: i64,
    pub forecast_days: i64,
    pub include_same_day_forecast: bool,

    /// Rainfall assumed on days a past decision said to water
    pub replay_water_mm: Decimal,

    /// Weekly watering target in mm
    pub watering_target_mm: Decimal,

    /// Same-day forecast counts only above this chance
    pub rain_chance_threshold: Decimal,

    /// Trailing historical days summed by the decision rule
    pub trailing_days: i64,

    /// Rolling window used for ground-truth labels
    pub label_window_days: i64,

    pub insufficient_data: InsufficientDataPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourcesConfig {
    /// Fetch fresh data before deciding
    pub enabled: bool,

    /// Seven-day town forecast page
    pub forecast_url: String,

    /// Daily rainfall observations page
    pub historical_url: String,

    pub user_agent: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    /// Send email; when false notifications are only logged
    pub enabled: bool,

    /// Notify on every run instead of only when watering is advised
    pub notify_always: bool,

    pub sender: String,
    pub recipient: String,

    /// OAuth client credentials
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,

    /// OAuth token endpoint
    pub token_uri: String,

    /// Gmail API base URL
    pub api_base: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChartConfig {
    /// Directory the chart is written to
    pub output_dir: PathBuf,

    pub file_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    pub format: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("RAINFALL_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .add_source(config::Config::try_from(&Config::default())?)
            .set_override("environment", environment.clone())?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (RAINFALL__ prefix)
            .add_source(
                Environment::with_prefix("RAINFALL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl ModelConfig {
    pub fn feature_window(&self) -> FeatureWindow {
        FeatureWindow {
            hist_days: self.hist_days,
            forecast_days: self.forecast_days,
            include_same_day_forecast: self.include_same_day_forecast,
            replay_water_mm: self.replay_water_mm,
        }
    }

    pub fn decision_config(&self) -> DecisionConfig {
        DecisionConfig {
            watering_target_mm: self.watering_target_mm,
            rain_chance_threshold: self.rain_chance_threshold,
            trailing_days: self.trailing_days,
        }
    }

    pub fn label_config(&self) -> LabelConfig {
        LabelConfig {
            window_days: self.label_window_days,
            watering_target_mm: self.watering_target_mm,
            replay_water_mm: self.replay_water_mm,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/rainfall.db".to_string(),
            create_if_missing: true,
            max_connections: 1,
            acquire_timeout_secs: 30,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let window = FeatureWindow::default();
        let decision = DecisionConfig::default();
        let labels = LabelConfig::default();
        Self {
            name: "logic".to_string(),
            replay_model: "logic".to_string(),
            hist_days: window.hist_days,
            forecast_days: window.forecast_days,
            include_same_day_forecast: window.include_same_day_forecast,
            replay_water_mm: window.replay_water_mm,
            watering_target_mm: decision.watering_target_mm,
            rain_chance_threshold: decision.rain_chance_threshold,
            trailing_days: decision.trailing_days,
            label_window_days: labels.window_days,
            insufficient_data: InsufficientDataPolicy::default(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            forecast_url: "http://www.bom.gov.au/nsw/forecasts/sydney.shtml".to_string(),
            historical_url: "http://www.bom.gov.au/jsp/ncc/cdio/weatherData/av?p_nccObsCode=136&p_display_type=dailyDataFile&p_stn_num=66037".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            notify_always: false,
            sender: String::new(),
            recipient: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("img"),
            file_name: "forecast.svg".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
        }
    }
}

//! Configuration for the orchestration engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// IANA time zone used when expanding medication schedules
    pub timezone: String,

    /// Gap without cam reports after which an active sedentary session
    /// is treated as an implicit "stood up"
    #[serde(with = "duration_serde")]
    pub stale_timeout: Duration,

    /// How often the maintenance loop runs
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Anomaly detection tuning
    pub anomaly: AnomalyConfig,

    /// Degraded-reminder retry tuning
    pub retry: RetryConfig,

    /// Reminder delivery collaborator endpoint
    pub delivery: DeliveryConfig,

    /// Path for durable state (degraded queue, notification journal, stats)
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("caremind");

        Self {
            timezone: "UTC".to_string(),
            stale_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(30),
            anomaly: AnomalyConfig::default(),
            retry: RetryConfig::default(),
            delivery: DeliveryConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("caremind")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check fields that cannot be validated structurally.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        Ok(())
    }

    /// Parse the configured time zone name.
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ConfigError::ParseError(format!("unknown timezone '{}'", self.timezone)))
    }
}

/// Tuning for habit anomaly detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// |z| above which a value is considered anomalous
    pub z_threshold: f64,
    /// Minimum profile confidence before anomalies are reported
    pub min_confidence: f64,
    /// Minimum sample count before anomalies are reported
    pub min_count: u64,
    /// Saturation constant for confidence = count / (count + k)
    pub confidence_k: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.0,
            min_confidence: 0.4,
            min_count: 3,
            confidence_k: 6.0,
        }
    }
}

/// Backoff tuning for reminders degraded to the local queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First retry delay
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,
    /// Upper bound on the retry delay
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff delay for the given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Reminder delivery collaborator endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Delivery service host
    pub host: String,
    /// Delivery service port
    pub port: u16,
    /// Bearer authentication token, if the collaborator requires one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9002,
            token: None,
            timeout_secs: 5,
        }
    }
}

impl DeliveryConfig {
    /// Get the full service URL.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get the schedule endpoint URL.
    pub fn schedule_url(&self) -> String {
        format!("{}/schedule", self.url())
    }

    /// Get the cancel endpoint URL for a reminder.
    pub fn cancel_url(&self, reminder_id: &str) -> String {
        format!("{}/cancel/{}", self.url(), reminder_id)
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

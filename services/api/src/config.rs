use callbridge_core::{agent::AudioFormat, credentials::DEFAULT_API_BASE};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub api_key: String,
    pub agent_id: String,
    pub api_base: String,
    pub output_format: AudioFormat,
    pub connect_timeout: Duration,
    pub log_level: Level,
}

fn required(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name.to_string())),
    }
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parsed(
            "BIND_ADDRESS",
            SocketAddr::from(([0, 0, 0, 0], 8000)),
        )?;

        let api_key = required("ELEVENLABS_API_KEY")?;
        let agent_id = required("ELEVENLABS_AGENT_ID")?;
        let api_base =
            std::env::var("ELEVENLABS_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        let defaults = AudioFormat::default();
        let encoding =
            std::env::var("AGENT_OUTPUT_ENCODING").unwrap_or_else(|_| defaults.encoding.clone());
        let sample_rate = parsed("AGENT_OUTPUT_SAMPLE_RATE", defaults.sample_rate)?;

        let connect_timeout_secs: u64 = parsed("CONNECT_TIMEOUT_SECS", 10)?;
        if connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CONNECT_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            api_key,
            agent_id,
            api_base,
            output_format: AudioFormat {
                encoding,
                sample_rate,
            },
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            log_level,
        })
    }
}

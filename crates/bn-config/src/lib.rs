//! # bn-config
//!
//! Process settings. Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `banna.toml` in the working directory (optional)
//! 3. `BANNA__*` environment variables, `__` separating sections,
//!    e.g. `BANNA__RELAY__BASE_URL`
//!
//! `.env` is loaded into the environment before anything is read.

use std::collections::HashMap;

use config::{Config, Environment, File, FileFormat};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const ENV_PREFIX: &str = "BANNA";
const FILE_NAME: &str = "banna";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub relay: RelaySettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
    pub detection: DetectionSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Expected in the `X-Banna-Token` header of every intake request.
    pub token: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct RelaySettings {
    pub base_url: String,
    pub token: SecretString,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CacheSettings {
    pub directory: String,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Deserialize)]
pub struct DetectionSettings {
    /// Keep the strongest avatar verdict instead of the last comparison's.
    pub strongest_avatar_verdict: bool,
}

impl Settings {
    /// Loads `.env`, `banna.toml` and the environment.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        let builder = defaults(Config::builder())?
            .add_source(File::with_name(FILE_NAME).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));
        Self::finish(builder.build()?)
    }

    /// Builds settings from an in-memory TOML document and an explicit
    /// environment map instead of the process environment.
    pub fn from_parts(toml: &str, env: HashMap<String, String>) -> Result<Self, SettingsError> {
        let builder = defaults(Config::builder())?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").source(Some(env)));
        Self::finish(builder.build()?)
    }

    fn finish(config: Config) -> Result<Self, SettingsError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.server.token.expose_secret().is_empty() {
            return Err(SettingsError::Invalid("server.token must be set".to_string()));
        }
        if self.relay.token.expose_secret().is_empty() {
            return Err(SettingsError::Invalid("relay.token must be set".to_string()));
        }
        if self.relay.base_url.is_empty() {
            return Err(SettingsError::Invalid("relay.base_url must be set".to_string()));
        }
        if self.relay.timeout_secs == 0 || self.cache.fetch_timeout_secs == 0 {
            return Err(SettingsError::Invalid("timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}

fn defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, SettingsError> {
    Ok(builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.token", "")?
        .set_default("relay.base_url", "http://127.0.0.1:8700")?
        .set_default("relay.token", "")?
        .set_default("relay.timeout_secs", 10)?
        .set_default("database.url", "sqlite://data/banna.db")?
        .set_default("cache.directory", "data/avatars")?
        .set_default("cache.fetch_timeout_secs", 15)?
        .set_default("logging.level", "info")?
        .set_default("logging.json", false)?
        .set_default("detection.strongest_avatar_verdict", false)?)
}

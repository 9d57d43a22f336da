//! The `config` module handles the application's configuration management.
//!
//! It defines the structure of the application settings, provides default
//! values, and implements the logic for loading configuration from files
//! and environment variables.
//!
//! This module uses the `config` crate for flexible and layered configuration.

pub mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::Settings;

pub use settings::{ApiSettings, IngestSettings, ServerSettings, StreamSettings};

/// Loads application settings from file, environment, and defaults.
///
/// This function reads configuration values from:
/// 1. An optional `config/default` file (TOML/YAML/JSON).
/// 2. Environment variables with `__` separators (e.g., `SERVER__PORT`).
///
/// Missing fields are filled using default values defined in `Settings::default()`.
///
/// # Errors
///
/// Returns an error if the config file cannot be parsed or deserialized.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("__").try_parsing(true));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    let server = match partial.server {
        Some(s) => settings::ServerSettings {
            hostname: s.hostname.unwrap_or(default.server.hostname),
            port: s.port.unwrap_or(default.server.port),
            https: s.https.unwrap_or(default.server.https),
            cert_path: s.cert_path.or(default.server.cert_path),
            proxy_protocol: s.proxy_protocol.unwrap_or(default.server.proxy_protocol),
        },
        None => default.server,
    };

    let stream = match partial.stream {
        Some(s) => settings::StreamSettings {
            keepalive_interval: s.keepalive_interval.unwrap_or(default.stream.keepalive_interval),
            retry_time: s.retry_time.unwrap_or(default.stream.retry_time),
            status_interval: s.status_interval.unwrap_or(default.stream.status_interval),
            shutdown_delay: s.shutdown_delay.unwrap_or(default.stream.shutdown_delay),
        },
        None => default.stream,
    };

    let api = match partial.api {
        Some(a) => settings::ApiSettings {
            url: a.url.unwrap_or(default.api.url),
            version: a.version.unwrap_or(default.api.version),
            request_headers: a.request_headers.unwrap_or(default.api.request_headers),
        },
        None => default.api,
    };

    let ingest = match partial.ingest {
        Some(i) => settings::IngestSettings {
            topic: i.topic.unwrap_or(default.ingest.topic),
        },
        None => default.ingest,
    };

    Ok(Settings {
        server,
        stream,
        api,
        ingest,
        dev: partial.dev.unwrap_or(default.dev),
    })
}

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// This struct aggregates all configuration parameters required to run the
/// streamcast server: network settings for the listener, stream timing
/// parameters, and the upstream API used for key resolution and the queue
/// bridge.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Configuration for the HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Timing parameters for live streams: keepalive, retry advertisement,
    /// status logging and shutdown grace period.
    pub stream: StreamSettings,
    /// Upstream API used by the identity resolver and the queue bridge.
    pub api: ApiSettings,
    /// External event-bus bridge settings.
    pub ingest: IngestSettings,
    /// Development mode: in-memory ingest source, notification injection
    /// over HTTP, and verbose error reasons on close frames.
    pub dev: bool,
}

/// Configuration settings for the listener.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// The host address (e.g., "127.0.0.1" or "0.0.0.0") the server will bind to.
    pub hostname: String,
    /// The port number the server will listen on.
    pub port: u16,
    /// Terminate TLS on the listener itself.
    pub https: bool,
    /// Path to a PEM bundle holding the certificate chain and private key.
    /// Required when `https` is set.
    pub cert_path: Option<String>,
    /// Expect a PROXY protocol v1 preamble on every accepted connection,
    /// as sent by TCP load balancers.
    pub proxy_protocol: bool,
}

/// Timing parameters for live connections.
#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    /// Seconds between keepalive pings on each connection.
    pub keepalive_interval: u64,
    /// Reconnect-retry value advertised to clients, in seconds. Clients
    /// receive it as milliseconds in the `connected` event.
    pub retry_time: u64,
    /// Seconds between status log lines (connection/subscription counts).
    pub status_interval: u64,
    /// Grace period in milliseconds between shutdown completion and exit.
    pub shutdown_delay: u64,
}

/// Upstream API settings shared by the identity resolver and queue bridge.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    /// Base URL of the upstream API, without a trailing slash.
    pub url: String,
    /// Value of the `API-Version` header sent on every request.
    pub version: u32,
    /// Extra headers added to every upstream request.
    pub request_headers: HashMap<String, String>,
}

/// External event-bus bridge settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    /// Bus topic the server's queue is subscribed to.
    pub topic: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled
/// using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub stream: Option<PartialStreamSettings>,
    pub api: Option<PartialApiSettings>,
    pub ingest: Option<PartialIngestSettings>,
    pub dev: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub https: Option<bool>,
    pub cert_path: Option<String>,
    pub proxy_protocol: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStreamSettings {
    pub keepalive_interval: Option<u64>,
    pub retry_time: Option<u64>,
    pub status_interval: Option<u64>,
    pub shutdown_delay: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialApiSettings {
    pub url: Option<String>,
    pub version: Option<u32>,
    pub request_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialIngestSettings {
    pub topic: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                hostname: "127.0.0.1".to_string(),
                port: 8080,
                https: false,
                cert_path: None,
                proxy_protocol: false,
            },
            stream: StreamSettings {
                keepalive_interval: 25,
                retry_time: 10,
                status_interval: 60,
                shutdown_delay: 1000,
            },
            api: ApiSettings {
                url: "http://localhost:8000".to_string(),
                version: 1,
                request_headers: HashMap::new(),
            },
            ingest: IngestSettings {
                topic: "streamcast".to_string(),
            },
            dev: false,
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::ApiSettings;
use crate::identity::{IdentityResolver, ResolverError};
use crate::utils::logging::redact_key;

/// Upper bound on simultaneous identity requests across the process.
const MAX_IN_FLIGHT_REQUESTS: usize = 10;
/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolver backed by the remote identity service over HTTP.
///
/// `GET {url}/keys/{key}/topics` returns the key's accessible topics;
/// `GET {url}{topic}` answers 200 when the topic is publicly accessible.
/// Every request carries the configured extra headers and an
/// `API-Version` header.
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    base_url: String,
    permits: Semaphore,
}

#[derive(Debug, Deserialize)]
struct TopicsResponse {
    topics: Vec<String>,
}

impl HttpIdentityResolver {
    pub fn new(settings: &ApiSettings) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("API-Version", HeaderValue::from_str(&settings.version.to_string())?);
        for (name, value) in &settings.request_headers {
            headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            permits: Semaphore::new(MAX_IN_FLIGHT_REQUESTS),
        })
    }
}

/// Strips the URL from a transport error so API keys never leak into
/// logs or close reasons.
fn request_error(err: reqwest::Error) -> ResolverError {
    ResolverError::Upstream(err.without_url().to_string())
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn topics_for_key(&self, api_key: &str) -> Result<Vec<String>, ResolverError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ResolverError::Upstream(e.to_string()))?;
        debug!("resolving topics for key {}", redact_key(api_key));
        let url = format!("{}/keys/{}/topics", self.base_url, api_key);
        let response = self.client.get(&url).send().await.map_err(request_error)?;
        match response.status() {
            StatusCode::OK => {
                let body: TopicsResponse = response.json().await.map_err(request_error)?;
                Ok(body.topics)
            }
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Err(ResolverError::Unauthorized),
            status => Err(ResolverError::Upstream(format!(
                "identity service returned {}",
                status
            ))),
        }
    }

    async fn is_public_topic(&self, topic: &str) -> Result<bool, ResolverError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ResolverError::Upstream(e.to_string()))?;
        let url = format!("{}{}", self.base_url, topic);
        let response = self.client.get(&url).send().await.map_err(request_error)?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(false),
            status => Err(ResolverError::Upstream(format!(
                "identity service returned {}",
                status
            ))),
        }
    }
}

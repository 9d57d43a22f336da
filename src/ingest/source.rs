use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::ApiSettings;
use crate::ingest::envelope::{encode_body, Envelope, IngestError};

/// Maximum number of envelopes pulled per receive call.
pub const BATCH_SIZE: usize = 10;
/// Long-poll wait passed to the queue bridge, in seconds.
pub const RECEIVE_WAIT_SECS: u64 = 20;

/// A source of raw notification envelopes from the external event bus.
///
/// `receive` long-polls for the next batch; `delete` acknowledges handled
/// envelopes; `release` unsubscribes/terminates the source at shutdown.
#[async_trait]
pub trait IngestSource: Send + Sync {
    async fn receive(&self) -> Result<Vec<Envelope>, IngestError>;

    async fn delete(&self, receipt_handles: Vec<String>) -> Result<(), IngestError>;

    async fn release(&self) -> Result<(), IngestError>;
}

/// In-memory source used in dev mode and tests. Envelopes are injected
/// through an [`IngestHandle`]; deletes and release are no-ops.
pub struct ChannelSource {
    receiver: Mutex<UnboundedReceiver<Envelope>>,
}

/// Injection handle paired with a [`ChannelSource`].
#[derive(Clone)]
pub struct IngestHandle {
    sender: UnboundedSender<Envelope>,
}

impl ChannelSource {
    pub fn new() -> (Self, IngestHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { receiver: Mutex::new(receiver) }, IngestHandle { sender })
    }
}

impl IngestHandle {
    /// Wraps an inner notification payload in a fresh envelope and queues
    /// it for the dispatcher.
    pub fn publish(&self, inner: &str) {
        let envelope = Envelope {
            message_id: Uuid::new_v4().to_string(),
            receipt_handle: Uuid::new_v4().to_string(),
            body: encode_body(inner),
        };
        let _ = self.sender.send(envelope);
    }
}

#[async_trait]
impl IngestSource for ChannelSource {
    async fn receive(&self) -> Result<Vec<Envelope>, IngestError> {
        let mut receiver = self.receiver.lock().await;
        let first = receiver
            .recv()
            .await
            .ok_or_else(|| IngestError::Source("ingest channel closed".to_string()))?;
        let mut batch = vec![first];
        while batch.len() < BATCH_SIZE {
            match receiver.try_recv() {
                Ok(envelope) => batch.push(envelope),
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    async fn delete(&self, _receipt_handles: Vec<String>) -> Result<(), IngestError> {
        Ok(())
    }

    async fn release(&self) -> Result<(), IngestError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct QueueCreated {
    #[serde(rename = "queueURL")]
    queue_url: String,
}

/// Source backed by the HTTP queue bridge in front of the event bus.
///
/// Provisioning binds a queue to the configured bus topic; receives
/// long-poll `GET {queue}/messages`, acknowledgements post the receipt
/// handles back, and release deletes the queue.
pub struct HttpQueueSource {
    client: reqwest::Client,
    queue_url: String,
}

impl HttpQueueSource {
    pub async fn provision(settings: &ApiSettings, topic: &str) -> Result<Self, IngestError> {
        // queue requests carry the same headers as identity requests
        let mut headers = HeaderMap::new();
        headers.insert(
            "API-Version",
            HeaderValue::from_str(&settings.version.to_string()).map_err(invalid_header)?,
        );
        for (name, value) in &settings.request_headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).map_err(invalid_header)?,
                HeaderValue::from_str(value).map_err(invalid_header)?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(RECEIVE_WAIT_SECS + 10))
            .default_headers(headers)
            .build()
            .map_err(|e| IngestError::Source(e.to_string()))?;
        let base = settings.url.trim_end_matches('/');
        let created: QueueCreated = client
            .post(format!("{}/queues", base))
            .json(&serde_json::json!({ "topic": topic }))
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;
        info!("ingest queue provisioned for topic {}", topic);
        Ok(Self { client, queue_url: created.queue_url })
    }
}

fn request_error(err: reqwest::Error) -> IngestError {
    IngestError::Source(err.without_url().to_string())
}

fn invalid_header<E: std::fmt::Display>(err: E) -> IngestError {
    IngestError::Source(format!("invalid request header: {}", err))
}

#[async_trait]
impl IngestSource for HttpQueueSource {
    async fn receive(&self) -> Result<Vec<Envelope>, IngestError> {
        let envelopes: Vec<Envelope> = self
            .client
            .get(format!(
                "{}/messages?max={}&wait={}",
                self.queue_url, BATCH_SIZE, RECEIVE_WAIT_SECS
            ))
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;
        Ok(envelopes)
    }

    async fn delete(&self, receipt_handles: Vec<String>) -> Result<(), IngestError> {
        self.client
            .post(format!("{}/messages/delete", self.queue_url))
            .json(&serde_json::json!({ "receiptHandles": receipt_handles }))
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }

    async fn release(&self) -> Result<(), IngestError> {
        self.client
            .delete(&self.queue_url)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;
        Ok(())
    }
}

use serde::Deserialize;
use thiserror::Error;

/// One raw message pulled off the queue bridge. `body` wraps the actual
/// notification twice: it is a JSON string holding `{"Message": <inner>}`,
/// the shape a generic pub-sub-over-queue bridge produces.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "MessageId")]
    pub message_id: String,
    #[serde(rename = "ReceiptHandle")]
    pub receipt_handle: String,
    #[serde(rename = "Body")]
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct NotificationBody {
    #[serde(rename = "Message")]
    message: String,
}

/// The inner notification payload, tagged by `event`. The set of events is
/// closed; an unknown tag fails to decode and the envelope is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event")]
pub enum Notification {
    #[serde(rename = "topicUpdated")]
    TopicUpdated { topic: String, version: u64 },

    #[serde(rename = "topicAdded")]
    TopicAdded {
        #[serde(rename = "apiKey")]
        api_key: String,
        topic: String,
    },

    #[serde(rename = "topicRemoved")]
    TopicRemoved {
        #[serde(rename = "apiKey")]
        api_key: String,
        topic: String,
    },

    /// `topic` is a prefix: every subscription under it is removed.
    #[serde(rename = "topicDeleted")]
    TopicDeleted { topic: String },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed notification payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("ingest source error: {0}")]
    Source(String),
}

/// Unwraps the doubly-nested envelope body into a notification.
pub fn decode_body(body: &str) -> Result<Notification, IngestError> {
    let outer: NotificationBody = serde_json::from_str(body)?;
    let notification: Notification = serde_json::from_str(&outer.message)?;
    Ok(notification)
}

/// Wraps an inner notification payload the way the queue bridge does, for
/// the in-memory source and tests.
pub fn encode_body(inner: &str) -> String {
    serde_json::json!({ "Message": inner }).to_string()
}

use serde::{Deserialize, Serialize};

/// Represents a command sent by a client over its connection.
///
/// Inbound frames are JSON objects tagged by an `action` field. The set of
/// actions is closed; anything else fails to parse and is rejected.
#[derive(Debug, Deserialize)]
#[serde(tag = "action")]
pub enum ClientMessage {
    #[serde(rename = "createSubscriptions")]
    CreateSubscriptions { subscriptions: Vec<SubscriptionRequest> },

    #[serde(rename = "deleteSubscriptions")]
    DeleteSubscriptions { subscriptions: Vec<UnsubscribeRequest> },
}

/// One entry of a `createSubscriptions` command.
///
/// With `topics` absent or empty, `api_key` is required and every topic the
/// key resolves to is subscribed, with access tracking enabled for the key.
/// With `topics` given, each topic is checked against the key's resolved
/// set (or against public accessibility when no key is given).
#[derive(Debug, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    pub topics: Option<Vec<String>>,
}

/// One entry of a `deleteSubscriptions` command. Without a topic, every
/// subscription under the key is removed.
#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub topic: Option<String>,
}

/// Represents an event written to a client connection.
///
/// Outbound frames are JSON objects tagged by an `event` field. Optional
/// fields are omitted entirely rather than serialized as null.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ServerMessage {
    /// First event on every connection. `connection_id` is present iff the
    /// connection is multi-key; `topics` iff it is single-key.
    #[serde(rename = "connected")]
    Connected {
        /// Reconnect-retry value in milliseconds.
        retry: u64,
        #[serde(rename = "connectionID", skip_serializing_if = "Option::is_none")]
        connection_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        topics: Option<Vec<String>>,
    },

    #[serde(rename = "topicUpdated")]
    TopicUpdated { topic: String, version: u64 },

    /// The key is omitted on single-key connections.
    #[serde(rename = "topicAdded")]
    TopicAdded {
        topic: String,
        #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },

    /// The key is omitted on single-key connections and for `"public"`.
    #[serde(rename = "topicRemoved")]
    TopicRemoved {
        topic: String,
        #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },

    #[serde(rename = "subscriptionsCreated")]
    SubscriptionsCreated {
        subscriptions: Vec<SubscriptionReport>,
        errors: Vec<SubscriptionErrorReport>,
    },

    #[serde(rename = "subscriptionsDeleted")]
    SubscriptionsDeleted {},
}

/// Reports the full current topic list for one `(connection, apiKey)` pair
/// after a `createSubscriptions` command. The key is omitted for public
/// subscriptions.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionReport {
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub topics: Vec<String>,
}

/// One rejected topic of a `createSubscriptions` command.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionErrorReport {
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub topic: String,
    pub error: String,
}

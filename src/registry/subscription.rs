/// Reserved API-key value for subscriptions created without an API key.
pub const PUBLIC_KEY: &str = "public";

/// A live mapping from a connection and an API key (or `"public"`) to a
/// topic, causing that topic's notifications to be delivered to that
/// connection.
///
/// A subscription is a value triple with no identity beyond its fields:
/// no two live subscriptions share the same `(connection, api_key, topic)`
/// combination, and the registry indexes store the triple itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Identifier of the connection this subscription delivers to.
    pub connection: String,
    /// The API key the subscription was created under, or `"public"`.
    pub api_key: String,
    /// The topic, a string beginning with `/`.
    pub topic: String,
}

impl Subscription {
    pub fn new(connection: &str, api_key: &str, topic: &str) -> Self {
        Self {
            connection: connection.to_string(),
            api_key: api_key.to_string(),
            topic: topic.to_string(),
        }
    }

    /// Whether this subscription was created without an API key.
    pub fn is_public(&self) -> bool {
        self.api_key == PUBLIC_KEY
    }
}

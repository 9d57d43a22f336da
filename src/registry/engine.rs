use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::interval;
use tracing::{debug, info};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::Message as WsMessage;

use crate::protocol::message::ServerMessage;
use crate::registry::connection::{
    generate_connection_id, Connection, MULTI_KEY_ID_LENGTH, SINGLE_KEY_ID_LENGTH,
};
use crate::registry::subscription::{Subscription, PUBLIC_KEY};
use crate::utils::error::truncate_reason;
use crate::utils::logging::redact_key;

/// The subscription registry: the sole owner and mutator of connection and
/// subscription state.
///
/// Three indexes cover the live subscriptions (the per-connection ordered
/// list, the per-topic set and the per-key set) and must agree on
/// membership at every return point. Operations here complete synchronously
/// and never perform I/O beyond writing to the outbound sinks of
/// connections the registry already owns; writes to a closed sink are
/// silently dropped.
#[derive(Debug)]
pub struct Registry {
    connections: HashMap<String, Connection>,
    topic_index: HashMap<String, HashSet<Subscription>>,
    key_index: HashMap<String, HashSet<Subscription>>,
    num_connections: usize,
    num_subscriptions: usize,
    keepalive_interval: Duration,
}

impl Registry {
    pub fn new(keepalive_interval: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            topic_index: HashMap::new(),
            key_index: HashMap::new(),
            num_connections: 0,
            num_subscriptions: 0,
            keepalive_interval,
        }
    }

    /// Registers a new connection: allocates a unique identifier (6
    /// alphanumeric characters for single-key connections, 12 for
    /// multi-key, retried on collision), arms the keepalive task and
    /// stores the connection. Returns the assigned identifier.
    pub fn register_connection(
        &mut self,
        sender: UnboundedSender<WsMessage>,
        remote_addr: &str,
        single_key: bool,
    ) -> String {
        let length = if single_key {
            SINGLE_KEY_ID_LENGTH
        } else {
            MULTI_KEY_ID_LENGTH
        };
        let id = loop {
            let candidate = generate_connection_id(length);
            if !self.connections.contains_key(&candidate) {
                break candidate;
            }
        };

        let mut conn = Connection::new(id.clone(), sender.clone(), remote_addr.to_string(), single_key);
        if !self.keepalive_interval.is_zero() {
            let period = self.keepalive_interval;
            conn.set_keepalive(tokio::spawn(async move {
                let mut ticker = interval(period);
                // interval fires immediately on the first tick
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if sender.send(WsMessage::Ping(Vec::new())).is_err() {
                        break;
                    }
                }
            }));
        }

        self.connections.insert(id.clone(), conn);
        self.num_connections += 1;
        info!("connection {} registered from {}", id, remote_addr);
        id
    }

    /// Adds the subscription `(conn, api_key, topic)` to all three indexes.
    /// A duplicate triple is a no-op. Returns whether a subscription was
    /// created.
    pub fn add_subscription(&mut self, conn_id: &str, api_key: &str, topic: &str) -> bool {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return false;
        };
        let sub = Subscription::new(conn_id, api_key, topic);
        if conn.subscriptions.contains(&sub) {
            return false;
        }
        conn.subscriptions.push(sub.clone());
        self.topic_index
            .entry(topic.to_string())
            .or_default()
            .insert(sub.clone());
        self.key_index
            .entry(api_key.to_string())
            .or_default()
            .insert(sub);
        self.num_subscriptions += 1;
        debug!(
            "subscription added: {} {} {}",
            conn_id,
            redact_key(api_key),
            topic
        );
        true
    }

    /// Removes one subscription from all three indexes, clearing the
    /// access-tracking flag for its `(connection, api_key)` pair. Returns
    /// whether a removal happened; the counter is decremented iff it did.
    pub fn remove_subscription(&mut self, sub: &Subscription) -> bool {
        let mut removed = false;
        if let Some(conn) = self.connections.get_mut(&sub.connection) {
            conn.tracked_keys.remove(&sub.api_key);
            let before = conn.subscriptions.len();
            conn.subscriptions.retain(|s| s != sub);
            removed = conn.subscriptions.len() != before;
        }
        if let Some(set) = self.topic_index.get_mut(&sub.topic) {
            set.remove(sub);
            if set.is_empty() {
                self.topic_index.remove(&sub.topic);
            }
        }
        if let Some(set) = self.key_index.get_mut(&sub.api_key) {
            set.remove(sub);
            if set.is_empty() {
                self.key_index.remove(&sub.api_key);
            }
        }
        if removed {
            self.num_subscriptions -= 1;
        }
        removed
    }

    /// Removes every subscription of `conn_id` matching `api_key` and, if
    /// given, `topic`. Returns the number removed.
    pub fn remove_by_key_and_topic(
        &mut self,
        conn_id: &str,
        api_key: &str,
        topic: Option<&str>,
    ) -> usize {
        let matching: Vec<Subscription> = self
            .connections
            .get(conn_id)
            .map(|conn| {
                conn.subscriptions
                    .iter()
                    .filter(|s| s.api_key == api_key && topic.map_or(true, |t| s.topic == t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let mut count = 0;
        for sub in &matching {
            if self.remove_subscription(sub) {
                count += 1;
            }
        }
        count
    }

    /// Tears down a connection: removes every subscription it owns, stops
    /// the keepalive task, closes the outbound sink and drops the
    /// connection. Idempotent on a connection that is already gone.
    pub fn deregister_connection(&mut self, conn_id: &str) {
        let subs: Vec<Subscription> = match self.connections.get(conn_id) {
            Some(conn) => conn.subscriptions.clone(),
            None => return,
        };
        for sub in &subs {
            self.remove_subscription(sub);
        }
        if let Some(conn) = self.connections.remove(conn_id) {
            conn.stop_keepalive();
            self.num_connections -= 1;
            info!("connection {} deregistered", conn_id);
        }
        // the sink closes when the connection (and its sender) is dropped
    }

    /// Enables access tracking for `(conn_id, api_key)`: the registry will
    /// grow and shrink this connection's subscriptions for that key in
    /// response to `topicAdded`/`topicRemoved` notifications.
    pub fn enable_access_tracking(&mut self, conn_id: &str, api_key: &str) {
        if let Some(conn) = self.connections.get_mut(conn_id) {
            conn.tracked_keys.insert(api_key.to_string());
        }
    }

    pub fn disable_access_tracking(&mut self, conn_id: &str, api_key: &str) {
        if let Some(conn) = self.connections.get_mut(conn_id) {
            conn.tracked_keys.remove(api_key);
        }
    }

    /// True when the connection is single-key (its key is tracked
    /// implicitly and permanently) or tracking was enabled explicitly.
    pub fn is_access_tracked(&self, conn_id: &str, api_key: &str) -> bool {
        self.connections
            .get(conn_id)
            .map(|conn| conn.single_key || conn.tracked_keys.contains(api_key))
            .unwrap_or(false)
    }

    /// Fans a `topicUpdated` notification out to every subscription of the
    /// topic. Delivery order across connections is unspecified; within one
    /// connection events arrive in dispatch order.
    pub fn on_topic_updated(&self, topic: &str, version: u64) {
        let Some(subs) = self.topic_index.get(topic) else {
            return;
        };
        debug!("topicUpdated {} v{} -> {} subscriptions", topic, version, subs.len());
        for sub in subs {
            self.send_event(
                &sub.connection,
                &ServerMessage::TopicUpdated {
                    topic: topic.to_string(),
                    version,
                },
            );
        }
    }

    /// A key gained access to a topic: every access-tracked connection
    /// holding that key receives a `topicAdded` event and then the new
    /// subscription. The write precedes the index mutation, so a
    /// subsequent `topicUpdated` on the new topic is observed after
    /// `topicAdded`.
    pub fn on_topic_added(&mut self, api_key: &str, topic: &str) {
        let tracked: Vec<String> = {
            let Some(subs) = self.key_index.get(api_key) else {
                return;
            };
            let distinct: HashSet<&String> = subs.iter().map(|s| &s.connection).collect();
            distinct
                .into_iter()
                .filter(|conn_id| self.is_access_tracked(conn_id.as_str(), api_key))
                .cloned()
                .collect()
        };
        debug!(
            "topicAdded {} {} -> {} connections",
            redact_key(api_key),
            topic,
            tracked.len()
        );
        for conn_id in tracked {
            let single_key = self
                .connections
                .get(&conn_id)
                .map(|c| c.single_key)
                .unwrap_or(true);
            self.send_event(
                &conn_id,
                &ServerMessage::TopicAdded {
                    topic: topic.to_string(),
                    api_key: (!single_key).then(|| api_key.to_string()),
                },
            );
            self.add_subscription(&conn_id, api_key, topic);
        }
    }

    /// A key lost access to a topic: every subscription with exactly this
    /// `(api_key, topic)` pair is removed and notified.
    pub fn on_topic_removed(&mut self, api_key: &str, topic: &str) {
        let matching: Vec<Subscription> = self
            .key_index
            .get(api_key)
            .map(|subs| subs.iter().filter(|s| s.topic == topic).cloned().collect())
            .unwrap_or_default();
        self.delete_and_notify(&matching);
    }

    /// A topic subtree was deleted: every subscription whose topic begins
    /// with `topic_prefix` is removed and notified.
    pub fn on_topic_deleted(&mut self, topic_prefix: &str) {
        let matching: Vec<Subscription> = self
            .topic_index
            .iter()
            .filter(|(topic, _)| topic.starts_with(topic_prefix))
            .flat_map(|(_, subs)| subs.iter().cloned())
            .collect();
        self.delete_and_notify(&matching);
    }

    /// The delete-and-notify protocol: each subscription is removed first,
    /// then its connection receives a `topicRemoved` event. The key is
    /// included only for multi-key connections and never for `"public"`.
    fn delete_and_notify(&mut self, subs: &[Subscription]) {
        for sub in subs {
            self.remove_subscription(sub);
            let single_key = self
                .connections
                .get(&sub.connection)
                .map(|c| c.single_key)
                .unwrap_or(true);
            let api_key =
                (!single_key && sub.api_key != PUBLIC_KEY).then(|| sub.api_key.clone());
            self.send_event(
                &sub.connection,
                &ServerMessage::TopicRemoved {
                    topic: sub.topic.clone(),
                    api_key,
                },
            );
        }
    }

    /// Serializes an event and writes it to the connection's outbound sink.
    /// Unknown connections and closed sinks are ignored.
    pub fn send_event(&self, conn_id: &str, event: &ServerMessage) {
        if let Some(conn) = self.connections.get(conn_id) {
            if let Ok(text) = serde_json::to_string(event) {
                let _ = conn.sender.send(WsMessage::text(text));
            }
        }
    }

    /// Writes a close frame with an application close code to the
    /// connection, then deregisters it. The reason is reduced to a single
    /// line that fits the close-frame payload.
    pub fn close_connection(&mut self, conn_id: &str, code: u16, reason: &str) {
        if let Some(conn) = self.connections.get(conn_id) {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: truncate_reason(reason).into(),
            };
            let _ = conn.sender.send(WsMessage::Close(Some(frame)));
        }
        self.deregister_connection(conn_id);
    }

    /// Current topic list for the `(conn_id, api_key)` pair, in
    /// subscription order.
    pub fn topics_for_key_on(&self, conn_id: &str, api_key: &str) -> Vec<String> {
        self.connections
            .get(conn_id)
            .map(|conn| {
                conn.subscriptions
                    .iter()
                    .filter(|s| s.api_key == api_key)
                    .map(|s| s.topic.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_single_key(&self, conn_id: &str) -> Option<bool> {
        self.connections.get(conn_id).map(|c| c.single_key)
    }

    pub fn has_connection(&self, conn_id: &str) -> bool {
        self.connections.contains_key(conn_id)
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.num_connections
    }

    pub fn subscription_count(&self) -> usize {
        self.num_subscriptions
    }

    #[cfg(test)]
    pub(crate) fn topic_subscriptions(&self, topic: &str) -> Vec<Subscription> {
        self.topic_index
            .get(topic)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn key_subscriptions(&self, api_key: &str) -> Vec<Subscription> {
        self.key_index
            .get(api_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn connection_subscriptions(&self, conn_id: &str) -> Vec<Subscription> {
        self.connections
            .get(conn_id)
            .map(|c| c.subscriptions.clone())
            .unwrap_or_default()
    }
}

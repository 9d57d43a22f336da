use std::collections::HashSet;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tungstenite::protocol::Message as WsMessage;

use crate::registry::subscription::Subscription;

/// Identifier length for single-key connections.
pub const SINGLE_KEY_ID_LENGTH: usize = 6;
/// Identifier length for multi-key connections.
pub const MULTI_KEY_ID_LENGTH: usize = 12;

/// Represents one live client channel in the server.
///
/// Holds the server-assigned identifier, the outbound sink for this client,
/// the remote address, the connection attributes, the ordered list of
/// subscriptions owned by this connection, and the set of API keys with
/// access tracking enabled.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    pub remote_addr: String,
    /// Set when the connection was bound to a single API key at handshake.
    /// Such a connection never has subscriptions changed by client request.
    pub single_key: bool,
    pub sender: UnboundedSender<WsMessage>,
    /// Ordered list of live subscriptions owned by this connection.
    pub subscriptions: Vec<Subscription>,
    /// API keys with access tracking explicitly enabled. Single-key
    /// connections track their key implicitly and do not appear here.
    pub(crate) tracked_keys: HashSet<String>,
    keepalive: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        id: String,
        sender: UnboundedSender<WsMessage>,
        remote_addr: String,
        single_key: bool,
    ) -> Self {
        Self {
            id,
            remote_addr,
            single_key,
            sender,
            subscriptions: Vec::new(),
            tracked_keys: HashSet::new(),
            keepalive: None,
        }
    }

    pub(crate) fn set_keepalive(&mut self, handle: JoinHandle<()>) {
        self.keepalive = Some(handle);
    }

    pub(crate) fn stop_keepalive(&self) {
        if let Some(handle) = &self.keepalive {
            handle.abort();
        }
    }
}

/// Generates a random alphanumeric connection identifier of the given
/// length. Uniqueness among live connections is enforced by the registry,
/// which retries on collision.
pub(crate) fn generate_connection_id(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

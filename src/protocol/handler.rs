use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::identity::{IdentityResolver, ResolverError};
use crate::protocol::message::{
    ClientMessage, ServerMessage, SubscriptionErrorReport, SubscriptionReport,
    SubscriptionRequest, UnsubscribeRequest,
};
use crate::registry::{SharedRegistry, PUBLIC_KEY};
use crate::utils::error::{
    CLOSE_BAD_REQUEST, CLOSE_CONFLICT, CLOSE_FORBIDDEN, CLOSE_INTERNAL, CLOSE_METHOD_NOT_ALLOWED,
};

/// A failed client command. Carries the application close code and the
/// single-line reason surfaced to the client in the close frame.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct CommandError {
    pub code: u16,
    pub reason: String,
}

impl CommandError {
    fn bad_request(reason: impl Into<String>) -> Self {
        Self { code: CLOSE_BAD_REQUEST, reason: reason.into() }
    }

    fn method_not_allowed(reason: impl Into<String>) -> Self {
        Self { code: CLOSE_METHOD_NOT_ALLOWED, reason: reason.into() }
    }

    fn conflict(reason: impl Into<String>) -> Self {
        Self { code: CLOSE_CONFLICT, reason: reason.into() }
    }
}

impl From<ResolverError> for CommandError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::Unauthorized => Self {
                code: CLOSE_FORBIDDEN,
                reason: "Invalid API key".to_string(),
            },
            ResolverError::Upstream(msg) => Self { code: CLOSE_INTERNAL, reason: msg },
        }
    }
}

/// The mutations a `createSubscriptions` command will apply, computed
/// during the resolution phase. All identity lookups finish before the
/// registry lock is taken, so a resolver failure leaves the registry in
/// its prior state.
enum Plan {
    /// Key-only entry: track the key and subscribe every resolved topic.
    Tracked { api_key: String, topics: Vec<String> },
    /// Explicit topic list, already filtered down to the accepted topics.
    Explicit { api_key: Option<String>, accepted: Vec<String> },
}

/// Parses and executes one inbound command frame for a multi-key
/// connection. On error the caller closes the connection with the
/// returned code and reason.
pub async fn handle_message(
    registry: &SharedRegistry,
    resolver: &Arc<dyn IdentityResolver>,
    conn_id: &str,
    text: &str,
) -> Result<(), CommandError> {
    match registry.lock().unwrap().is_single_key(conn_id) {
        Some(false) => {}
        Some(true) => {
            return Err(CommandError::method_not_allowed(
                "Single-key connection cannot be modified",
            ))
        }
        // the connection went away while the frame was in flight
        None => return Ok(()),
    }

    let msg: ClientMessage = serde_json::from_str(text)
        .map_err(|e| CommandError::bad_request(format!("Invalid message: {}", e)))?;

    match msg {
        ClientMessage::CreateSubscriptions { subscriptions } => {
            create_subscriptions(registry, resolver, conn_id, subscriptions).await
        }
        ClientMessage::DeleteSubscriptions { subscriptions } => {
            delete_subscriptions(registry, conn_id, subscriptions)
        }
    }
}

async fn create_subscriptions(
    registry: &SharedRegistry,
    resolver: &Arc<dyn IdentityResolver>,
    conn_id: &str,
    subscriptions: Vec<SubscriptionRequest>,
) -> Result<(), CommandError> {
    if subscriptions.is_empty() {
        return Err(CommandError::bad_request("subscriptions array must not be empty"));
    }

    // Resolution phase: every identity lookup happens here, before any
    // registry mutation.
    let mut plans: Vec<Plan> = Vec::new();
    let mut errors: Vec<SubscriptionErrorReport> = Vec::new();
    for entry in &subscriptions {
        let topics = entry.topics.as_deref().unwrap_or(&[]);
        if topics.is_empty() {
            let Some(api_key) = &entry.api_key else {
                return Err(CommandError::bad_request(
                    "Subscription must specify an apiKey or topics",
                ));
            };
            let resolved = resolver.topics_for_key(api_key).await?;
            plans.push(Plan::Tracked { api_key: api_key.clone(), topics: resolved });
            continue;
        }

        for topic in topics {
            if !topic.starts_with('/') {
                return Err(CommandError::bad_request(format!(
                    "Invalid topic '{}': topics must begin with /",
                    topic
                )));
            }
        }
        let mut accepted = Vec::new();
        match &entry.api_key {
            Some(api_key) => {
                let allowed = resolver.topics_for_key(api_key).await?;
                for topic in topics {
                    if allowed.iter().any(|t| t == topic) {
                        accepted.push(topic.clone());
                    } else {
                        errors.push(SubscriptionErrorReport {
                            api_key: Some(api_key.clone()),
                            topic: topic.clone(),
                            error: "Topic is not valid for provided API key".to_string(),
                        });
                    }
                }
            }
            None => {
                for topic in topics {
                    if resolver.is_public_topic(topic).await? {
                        accepted.push(topic.clone());
                    } else {
                        errors.push(SubscriptionErrorReport {
                            api_key: None,
                            topic: topic.clone(),
                            error: "Topic is not accessible without an API key".to_string(),
                        });
                    }
                }
            }
        }
        plans.push(Plan::Explicit { api_key: entry.api_key.clone(), accepted });
    }

    // Mutation phase.
    let mut reg = registry.lock().unwrap();
    if !reg.has_connection(conn_id) {
        return Ok(());
    }
    let mut reported: Vec<Option<String>> = Vec::new();
    for plan in &plans {
        match plan {
            Plan::Tracked { api_key, topics } => {
                reg.enable_access_tracking(conn_id, api_key);
                for topic in topics {
                    reg.add_subscription(conn_id, api_key, topic);
                }
                let key = Some(api_key.clone());
                if !reported.contains(&key) {
                    reported.push(key);
                }
            }
            Plan::Explicit { api_key, accepted } => {
                let key = api_key.as_deref().unwrap_or(PUBLIC_KEY);
                for topic in accepted {
                    reg.add_subscription(conn_id, key, topic);
                }
                if !accepted.is_empty() && !reported.contains(api_key) {
                    reported.push(api_key.clone());
                }
            }
        }
    }
    debug!(
        "createSubscriptions on {}: {} accepted keys, {} errors",
        conn_id,
        reported.len(),
        errors.len()
    );
    let reports = reported
        .into_iter()
        .map(|api_key| {
            let lookup = api_key.as_deref().unwrap_or(PUBLIC_KEY);
            SubscriptionReport { topics: reg.topics_for_key_on(conn_id, lookup), api_key }
        })
        .collect();
    reg.send_event(
        conn_id,
        &ServerMessage::SubscriptionsCreated { subscriptions: reports, errors },
    );
    Ok(())
}

fn delete_subscriptions(
    registry: &SharedRegistry,
    conn_id: &str,
    subscriptions: Vec<UnsubscribeRequest>,
) -> Result<(), CommandError> {
    if subscriptions.is_empty() {
        return Err(CommandError::bad_request("subscriptions array must not be empty"));
    }
    let mut reg = registry.lock().unwrap();
    if !reg.has_connection(conn_id) {
        return Ok(());
    }
    let mut total = 0;
    for entry in &subscriptions {
        total += reg.remove_by_key_and_topic(conn_id, &entry.api_key, entry.topic.as_deref());
    }
    if total == 0 {
        return Err(CommandError::conflict("No matching subscription"));
    }
    debug!("deleteSubscriptions on {}: {} removed", conn_id, total);
    reg.send_event(conn_id, &ServerMessage::SubscriptionsDeleted {});
    Ok(())
}

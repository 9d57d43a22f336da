use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ingest::envelope::{decode_body, Notification};
use crate::ingest::source::IngestSource;
use crate::registry::SharedRegistry;
use crate::utils::logging::redact_key;

/// Pause before retrying after a failed receive.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The ingest loop: pulls batches from the source, decodes each envelope
/// and invokes the matching registry handler, then acknowledges the batch.
///
/// Malformed envelopes are logged and skipped but their batch is still
/// deleted, so a poison message cannot loop forever. Acknowledgement
/// failures are logged and counted without aborting the loop.
pub async fn run(
    source: Arc<dyn IngestSource>,
    registry: SharedRegistry,
    shutdown: CancellationToken,
) {
    let mut ack_failures: u64 = 0;
    loop {
        let batch = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = source.receive() => match received {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("ingest receive failed: {}", e);
                    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    continue;
                }
            },
        };
        if batch.is_empty() {
            continue;
        }

        let mut receipt_handles = Vec::with_capacity(batch.len());
        for envelope in batch {
            receipt_handles.push(envelope.receipt_handle.clone());
            match decode_body(&envelope.body) {
                Ok(notification) => dispatch(&registry, notification),
                Err(e) => {
                    warn!("skipping malformed envelope {}: {}", envelope.message_id, e);
                }
            }
        }

        if let Err(e) = source.delete(receipt_handles).await {
            ack_failures += 1;
            warn!("failed to acknowledge batch ({} total failures): {}", ack_failures, e);
        }
    }
    debug!("ingest loop stopped");
}

fn dispatch(registry: &SharedRegistry, notification: Notification) {
    let mut reg = registry.lock().unwrap();
    match notification {
        Notification::TopicUpdated { topic, version } => {
            debug!("ingest topicUpdated {} v{}", topic, version);
            reg.on_topic_updated(&topic, version);
        }
        Notification::TopicAdded { api_key, topic } => {
            debug!("ingest topicAdded {} {}", redact_key(&api_key), topic);
            reg.on_topic_added(&api_key, &topic);
        }
        Notification::TopicRemoved { api_key, topic } => {
            debug!("ingest topicRemoved {} {}", redact_key(&api_key), topic);
            reg.on_topic_removed(&api_key, &topic);
        }
        Notification::TopicDeleted { topic } => {
            debug!("ingest topicDeleted {}", topic);
            reg.on_topic_deleted(&topic);
        }
    }
}

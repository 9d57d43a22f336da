//! Process lifecycle: boots the ingest source, listener, status timer and
//! ingest loop in order, then waits for a signal or a fault and drives the
//! shutdown sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::identity::{HttpIdentityResolver, IdentityResolver};
use crate::ingest::{dispatcher, ChannelSource, HttpQueueSource, IngestHandle, IngestSource};
use crate::registry::{Registry, SharedRegistry};
use crate::transport::{self, accept, ServerState};

/// Runs the server to completion. Returns after a clean shutdown; an error
/// return means the process should exit non-zero.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    // Boot order: ingest source provisioned, listener bound, status timer
    // armed, ingest loop entered.
    let (source, ingest_handle): (Arc<dyn IngestSource>, Option<IngestHandle>) = if settings.dev {
        let (source, handle) = ChannelSource::new();
        info!("dev mode: using in-memory ingest source");
        (Arc::new(source), Some(handle))
    } else {
        let source = HttpQueueSource::provision(&settings.api, &settings.ingest.topic)
            .await
            .context("failed to provision ingest queue")?;
        (Arc::new(source), None)
    };

    let resolver: Arc<dyn IdentityResolver> = Arc::new(HttpIdentityResolver::new(&settings.api)?);
    let registry: SharedRegistry = Arc::new(Mutex::new(Registry::new(Duration::from_secs(
        settings.stream.keepalive_interval,
    ))));

    let tls = match (settings.server.https, &settings.server.cert_path) {
        (true, Some(path)) => Some(accept::load_tls_acceptor(path)?),
        (true, None) => anyhow::bail!("https is enabled but cert_path is not set"),
        _ => None,
    };

    let listener = TcpListener::bind((settings.server.hostname.as_str(), settings.server.port))
        .await
        .with_context(|| {
            format!("failed to bind {}:{}", settings.server.hostname, settings.server.port)
        })?;
    info!(
        "listening on {}:{} (https: {})",
        settings.server.hostname, settings.server.port, settings.server.https
    );

    let shutdown = CancellationToken::new();
    let state = Arc::new(ServerState {
        registry: registry.clone(),
        resolver,
        settings: settings.clone(),
        ingest: ingest_handle,
        tls,
    });

    let mut server = tokio::spawn(transport::run_server(listener, state, shutdown.clone()));
    let status = tokio::spawn(status_loop(
        registry.clone(),
        settings.stream.status_interval,
        shutdown.clone(),
    ));
    let mut ingest_loop = tokio::spawn(dispatcher::run(
        source.clone(),
        registry.clone(),
        shutdown.clone(),
    ));

    let fault = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            false
        }
        _ = terminate_signal() => {
            info!("terminate received, shutting down");
            false
        }
        result = &mut server => {
            error!("transport loop exited unexpectedly: {:?}", result);
            true
        }
        result = &mut ingest_loop => {
            error!("ingest loop exited unexpectedly: {:?}", result);
            true
        }
    };

    shutdown_sequence(
        &registry,
        source.as_ref(),
        &shutdown,
        settings.stream.shutdown_delay,
    )
    .await;
    status.abort();

    if fault {
        anyhow::bail!("shut down after fault");
    }
    Ok(())
}

/// The shutdown sequence: stop accepting, deregister every connection,
/// cancel the timers and ingest loop, release the ingest source, then wait
/// out the grace period. A second invocation while one is in progress
/// returns immediately.
async fn shutdown_sequence(
    registry: &SharedRegistry,
    source: &dyn IngestSource,
    shutdown: &CancellationToken,
    delay_ms: u64,
) {
    static STOPPING: AtomicBool = AtomicBool::new(false);
    if STOPPING.swap(true, Ordering::SeqCst) {
        return;
    }
    shutdown.cancel();
    let ids = {
        let mut reg = registry.lock().unwrap();
        let ids = reg.connection_ids();
        for id in &ids {
            reg.deregister_connection(id);
        }
        ids
    };
    info!("deregistered {} connections", ids.len());
    if let Err(e) = source.release().await {
        warn!("failed to release ingest source: {}", e);
    }
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

/// Logs connection and subscription counts every `interval_secs` seconds.
async fn status_loop(registry: SharedRegistry, interval_secs: u64, shutdown: CancellationToken) {
    if interval_secs == 0 {
        return;
    }
    let mut ticker = interval(Duration::from_secs(interval_secs));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let (connections, subscriptions) = {
                    let reg = registry.lock().unwrap();
                    (reg.connection_count(), reg.subscription_count())
                };
                info!("status: {} connections, {} subscriptions", connections, subscriptions);
            }
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(e) => {
            warn!("failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::Message as WsMessage;

use crate::config::Settings;
use crate::identity::{IdentityResolver, ResolverError};
use crate::ingest::IngestHandle;
use crate::protocol::{self, ServerMessage};
use crate::registry::SharedRegistry;
use crate::transport::accept::{self, Rewind, Route};
use crate::utils::error::{truncate_reason, CLOSE_FORBIDDEN, CLOSE_INTERNAL};

/// Reason used for upstream failures outside dev mode.
const GENERIC_UPSTREAM_REASON: &str = "Error connecting to server";

/// Everything a connection task needs, shared across the listener.
pub struct ServerState {
    pub registry: SharedRegistry,
    pub resolver: Arc<dyn IdentityResolver>,
    pub settings: Settings,
    /// Injection handle for the in-memory ingest source; set in dev mode
    /// and used by `POST /ingest`.
    pub ingest: Option<IngestHandle>,
    pub tls: Option<TlsAcceptor>,
}

/// Accept loop. Each connection runs in its own task; the loop stops when
/// the shutdown token fires.
pub async fn run_server(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_socket(stream, peer, state).await {
                            debug!("connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("accept failed: {}", e),
            },
        }
    }
    info!("listener stopped");
}

async fn handle_socket(
    mut tcp: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let (remote, leftover) = if state.settings.server.proxy_protocol {
        accept::read_proxy_header(&mut tcp).await?
    } else {
        (peer.to_string(), Vec::new())
    };
    let stream = Rewind::new(leftover, tcp);
    let acceptor = state.tls.clone();
    match acceptor {
        Some(acceptor) => serve_stream(acceptor.accept(stream).await?, remote, state).await,
        None => serve_stream(stream, remote, state).await,
    }
}

async fn serve_stream<S>(mut stream: S, remote: String, state: Arc<ServerState>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let head = accept::read_request_head(&mut stream).await?;
    match accept::route_request(&head) {
        Route::Health => {
            accept::respond(&mut stream, 200, "OK", "OK").await?;
            Ok(())
        }
        Route::Ingest => {
            match (&state.ingest, accept::content_length(&head)) {
                (Some(handle), Some(length)) => {
                    let body = accept::read_body(&mut stream, &head, length).await?;
                    handle.publish(&String::from_utf8_lossy(&body));
                    accept::respond(&mut stream, 200, "OK", "OK").await?;
                }
                _ => {
                    accept::respond(&mut stream, 404, "Not Found", "Not Found").await?;
                }
            }
            Ok(())
        }
        Route::WebSocketUpgrade => {
            websocket_session(Rewind::new(head, stream), remote, state).await
        }
        Route::Unknown => {
            accept::respond(&mut stream, 405, "Method Not Allowed", "Method Not Allowed").await?;
            Ok(())
        }
    }
}

/// The API key offered at handshake, from the `key` query parameter or the
/// `X-API-Key` header.
fn extract_api_key(request: &Request) -> Option<String> {
    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("key=") {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn close_message(code: u16, reason: &str) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: truncate_reason(reason).into(),
    }))
}

/// One WebSocket session, from handshake to deregistration.
///
/// The key, if any, is resolved before the connection is registered, so an
/// authorization or upstream failure closes the socket without ever
/// touching the registry.
async fn websocket_session<S>(
    stream: Rewind<S>,
    remote: String,
    state: Arc<ServerState>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut api_key: Option<String> = None;
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        api_key = extract_api_key(request);
        Ok(response)
    })
    .await?;
    let (sink, mut reader) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let writer = tokio::spawn(write_loop(sink, rx));

    let resolved = match &api_key {
        Some(key) => match state.resolver.topics_for_key(key).await {
            Ok(topics) => Some(topics),
            Err(err) => {
                let (code, reason) = match err {
                    ResolverError::Unauthorized => {
                        (CLOSE_FORBIDDEN, "Invalid API key".to_string())
                    }
                    ResolverError::Upstream(msg) if state.settings.dev => (CLOSE_INTERNAL, msg),
                    ResolverError::Upstream(_) => {
                        (CLOSE_INTERNAL, GENERIC_UPSTREAM_REASON.to_string())
                    }
                };
                let _ = tx.send(close_message(code, &reason));
                drop(tx);
                let _ = writer.await;
                return Ok(());
            }
        },
        None => None,
    };

    let retry_ms = state.settings.stream.retry_time * 1000;
    let conn_id = {
        let mut reg = state.registry.lock().unwrap();
        let conn_id = reg.register_connection(tx.clone(), &remote, resolved.is_some());
        match (&api_key, &resolved) {
            (Some(key), Some(topics)) => {
                for topic in topics {
                    reg.add_subscription(&conn_id, key, topic);
                }
                reg.send_event(
                    &conn_id,
                    &ServerMessage::Connected {
                        retry: retry_ms,
                        connection_id: None,
                        topics: Some(topics.clone()),
                    },
                );
            }
            _ => {
                reg.send_event(
                    &conn_id,
                    &ServerMessage::Connected {
                        retry: retry_ms,
                        connection_id: Some(conn_id.clone()),
                        topics: None,
                    },
                );
            }
        }
        conn_id
    };
    // the registry and keepalive hold their own senders now
    drop(tx);

    while let Some(frame) = reader.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if let Err(err) =
                    protocol::handle_message(&state.registry, &state.resolver, &conn_id, &text)
                        .await
                {
                    let reason = if err.code == CLOSE_INTERNAL && !state.settings.dev {
                        GENERIC_UPSTREAM_REASON.to_string()
                    } else {
                        err.reason
                    };
                    state
                        .registry
                        .lock()
                        .unwrap()
                        .close_connection(&conn_id, err.code, &reason);
                    break;
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.registry.lock().unwrap().deregister_connection(&conn_id);
    let _ = writer.await;
    Ok(())
}

/// Drains one connection's outbound channel into its WebSocket sink,
/// preserving dispatch order. Ends when the channel closes or after a
/// close frame is written.
async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<Rewind<S>>, WsMessage>,
    mut rx: UnboundedReceiver<WsMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, WsMessage::Close(_));
        if sink.send(message).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

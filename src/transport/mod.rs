//! The `transport` module is responsible for handling network
//! communication with clients over WebSockets.
//!
//! It owns the listener: PROXY protocol and TLS preambles, the plain HTTP
//! routes (`/health`, dev-mode `/ingest`), the WebSocket handshake with
//! its API-key extraction, and the per-connection reader/writer tasks that
//! bridge sockets to the registry.

pub mod accept;
pub mod websocket;

pub use websocket::{run_server, ServerState};

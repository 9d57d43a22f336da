//! The `registry` module is the core of the fan-out server.
//!
//! It contains the following main components:
//!
//! - `Registry`: the engine owning the three subscription indexes and all
//!   mutations, including the notification fan-out handlers.
//! - `Connection`: one live client channel with its outbound sink.
//! - `Subscription`: the `(connection, apiKey, topic)` value triple.
//!
//! The registry is the single serialization point for subscription state:
//! it is shared as `Arc<Mutex<Registry>>` and every operation observes and
//! leaves the indexes consistent.

pub mod connection;
pub mod engine;
pub mod subscription;

use std::sync::{Arc, Mutex};

pub use connection::Connection;
pub use engine::Registry;
pub use subscription::{Subscription, PUBLIC_KEY};

/// The registry behind its single lock, as shared across the transport,
/// protocol handler and ingest dispatcher.
pub type SharedRegistry = Arc<Mutex<Registry>>;

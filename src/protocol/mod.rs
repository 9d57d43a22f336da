//! The `protocol` module defines the messaging protocol between clients
//! and the server, and the handler that executes inbound commands.
//!
//! Inbound frames are `action`-tagged commands (`createSubscriptions`,
//! `deleteSubscriptions`); outbound frames are `event`-tagged events. The
//! handler validates commands, performs every identity lookup before any
//! registry mutation, and reports failures as application close codes.

pub mod handler;
pub mod message;

pub use handler::{handle_message, CommandError};
pub use message::{ClientMessage, ServerMessage};

#[cfg(test)]
mod tests;

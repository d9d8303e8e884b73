//! Bidirectional transport: one actor per WebSocket connection.

pub mod actor;
pub mod handler;
pub mod protocol;

//! Request-based HTTP endpoints.

pub mod health;
pub mod send;

//! Peer relay server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod identity;
pub mod push;
pub mod registry;
pub mod routes;
pub mod state;
pub mod ws;

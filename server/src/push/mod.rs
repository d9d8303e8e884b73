//! Push transport: Server-Sent Events fed by a per-subscriber queue.

pub mod handler;
pub mod subscription;

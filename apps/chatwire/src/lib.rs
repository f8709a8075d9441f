//! Terminal chat client for a group pub/sub activity stream.

pub mod config;
pub mod conversation;
pub mod input;
pub mod live;
pub mod render;
pub mod session;
pub mod telemetry;
pub mod transport;

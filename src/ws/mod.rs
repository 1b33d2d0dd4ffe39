//! WebSocket transport: wire protocol, connection hub and socket sessions

pub mod handler;
pub mod hub;
pub mod protocol;

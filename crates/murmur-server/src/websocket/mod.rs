//! WebSocket connection management, session lifecycle, and broadcasting.

pub mod broadcast;
pub mod connection;
pub mod session;

//! # murmur-server
//!
//! Realtime chat relay over WebSocket.
//!
//! - Session registry: connection ID to display name, insertion ordered
//! - Broadcast dispatcher: routes inbound events to one, all, or all-but-one connection
//! - Axum HTTP + `WebSocket` gateway with `/health` and `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod welcome;
pub mod websocket;

pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use registry::SessionRegistry;
pub use server::MurmurServer;
pub use welcome::{SimulatedWelcome, WelcomeSource};

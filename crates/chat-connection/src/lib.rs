//! Reconnecting client for the NeoMind chat WebSocket.
//!
//! [`ChatClient`] keeps one authenticated connection alive, retries with
//! exponential backoff after unexpected drops, buffers outbound messages
//! while offline and fans inbound messages out to registered observers.

pub mod client;
pub mod config;
mod driver;
pub mod observers;
mod phase;
mod pumps;
pub mod queue;
pub mod token;
mod transport;
pub mod types;

pub use client::ChatClient;
pub use config::{ClientConfig, ConfigError, EndpointConfig};
pub use observers::Subscription;
pub use queue::PendingQueue;
pub use token::{SharedToken, TokenProvider, TokenStore, TokenStoreError};
pub use types::{AuthFailure, ConnectionState, ConnectionStatus, ReconnectConfig};

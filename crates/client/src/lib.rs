//! Kinderlink realtime client.
//!
//! Keeps the kindergarten dashboard's entity collections (attendance, groups,
//! children, billing alerts, ...) live over one WebSocket connection that
//! reconnects on its own.

pub mod config;
pub mod credentials;
pub mod error;
pub mod stores;
pub mod ws;

pub use config::ClientConfig;
pub use credentials::{CredentialStore, FileCredentialStore, StaticCredentials};
pub use error::{RealtimeError, Result};
pub use stores::{Collection, Entity, RealtimeData, Rollback, Tracked};
pub use ws::{ConnectionState, EventRouter, Outbox, RealtimeClient, ReconnectConfig, Subscription};

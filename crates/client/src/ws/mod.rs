//! Realtime socket layer.
//!
//! This module provides:
//! - Connection management with auto-reconnect ([`RealtimeClient`])
//! - Exact-name event routing to any number of listeners ([`EventRouter`])
//! - An offline queue for fire-and-forget events ([`Outbox`])
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  RealtimeClient                      │
//! │  (supervisor task: connect, pump frames, back off)   │
//! └──────────────────────────────────────────────────────┘
//!          │ inbound events              ▲ emit / emit_with_ack
//!          ▼                             │
//!   ┌─────────────┐               ┌─────────────┐
//!   │ EventRouter │               │   Outbox    │
//!   └─────────────┘               └─────────────┘
//!          │
//!          ├────────────────┬────────────────┐
//!          ▼                ▼                ▼
//!   ┌────────────┐   ┌────────────┐   ┌────────────┐
//!   │RealtimeData│   │RealtimeData│   │ listener   │
//!   │(attendance)│   │  (child)   │   │ (custom)   │
//!   └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let client = RealtimeClient::new(ClientConfig::from_env(), credentials);
//! client.connect();
//!
//! let children = RealtimeData::<Child>::bind(client.clone(), "child", Collection::many());
//! let _typing = client.subscribe("chat:typing", |payload| println!("{payload}"));
//! ```

mod connection;
#[cfg(feature = "dioxus")]
mod hooks;
mod outbox;
mod router;
pub mod transport;

pub use connection::{ConnectionState, LastMessage, RealtimeClient, ReconnectConfig};
pub use outbox::{Outbox, QueuedEvent};
pub use router::{EventRouter, Subscription};
pub use transport::{Connector, Link, MemoryConnector, ServerEnd, WsConnector};

#[cfg(feature = "dioxus")]
pub use hooks::{use_connection_state, use_realtime_data, UseRealtimeData};

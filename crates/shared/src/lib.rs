//! Shared wire types for the kinderlink realtime client and relay.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;

//! Client-side state kept in sync with the server.

pub mod collection;
pub mod realtime;

pub use collection::{deleted_id, Collection, Entity};
pub use realtime::{RealtimeData, Rollback, Tracked};

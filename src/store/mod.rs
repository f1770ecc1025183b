//! Persistence layer: libSQL-backed storage for messages and attempts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{MessageStatus, NewMessage, StoredMessage, UnsubscribeStore};

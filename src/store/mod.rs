//! Persistence backends for sessions and credentials.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{StoreBackend, StoreError};

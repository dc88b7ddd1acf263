//! Infrastructure layer - cache backends

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryResultCache;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteResultCache;

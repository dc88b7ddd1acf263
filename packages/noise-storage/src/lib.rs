//! Result cache for noise computations
//!
//! A key-value store boundary keyed by computation fingerprint
//! (`<content-hash>_<scenario-hash>`). Values are whole JSON documents:
//! writes overwrite the complete entry, there are no partial updates.
//!
//! ## Backends
//!
//! - `InMemoryResultCache`: process-local, concurrent map
//! - `SqliteResultCache`: single-file persistent store (feature `sqlite`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use noise_storage::{CachePolicy, InMemoryResultCache, ResultCache};
//!
//! let cache = InMemoryResultCache::new(CachePolicy::default());
//! cache.put("abc_def", serde_json::json!({"geojson": {}})).await?;
//! let hit = cache.get("abc_def").await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{CacheEntry, CachePolicy, ResultCache};
pub use infrastructure::InMemoryResultCache;

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteResultCache;

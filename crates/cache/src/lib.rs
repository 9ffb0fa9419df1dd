//! Read-through cache for content-API resources.
//!
//! [`CacheManager`] is a TTL cache whose entries may depend on other keys;
//! invalidating a key invalidates everything built from it. [`CacheCleanup`]
//! sweeps it periodically and [`BatchOperationExecutor`] merges many lookups
//! into one upstream fetch.
//!
//! ```ignore
//! use cache::CacheManager;
//! use std::time::Duration;
//!
//! let cache = CacheManager::default();
//! cache.set("post:42", post, Duration::from_secs(300), ["media:7", "author:3"]);
//! cache.delete("media:7"); // "post:42" goes too
//! ```

pub mod batch;
pub mod cleanup;
pub mod config;
mod entry;
pub mod error;
pub mod stats;
pub mod store;

pub use batch::{BatchOperation, BatchOperationExecutor, BatchResult, CacheKeyFn};
pub use cleanup::{CacheCleanup, CleanupHandle};
pub use config::CacheConfig;
pub use error::CacheError;
pub use stats::{CacheStats, CleanupReport};
pub use store::CacheManager;

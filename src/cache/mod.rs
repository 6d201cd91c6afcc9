//! Feedline query cache
//!
//! Keeps the results of feed, saved-index, search, per-user and single-post
//! queries keyed by a canonical [`QueryDescriptor`].
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! fresh_for_ms = 0
//! max_entries = 200
//! ```

mod config;
mod keys;
mod lock;
mod store;

pub use config::CacheConfig;
pub use keys::{QueryDescriptor, QueryKind};
pub use store::{CacheEntry, CacheSnapshot, EntryStatus, QueryCache, QueryData, QueryFetcher};

pub(crate) use lock::mutex_lock;

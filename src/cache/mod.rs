//! Named response buckets and the strategies that read and fill them.
//!
//! This module provides a request-keyed response cache that:
//! - Keeps snapshots in named, versioned buckets (one SQLite table, bucket column)
//! - Only ever stores GET responses with status 200
//! - Implements the network-first and cache-first strategies on top of any `Network`

mod key;
mod layer;
mod storage;

pub use key::RequestKey;
pub use layer::CacheLayer;
pub use storage::{CacheEntry, CacheStorage, CachedResponse, SqliteStorage};

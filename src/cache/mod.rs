//! In-memory response cache
//!
//! This module provides a bounded cache with per-entry TTL values. Expired
//! entries are never returned; when the cache is full the least recently used
//! entry makes room for the new one.

mod manager;

pub use manager::{CacheStats, TtlCache};

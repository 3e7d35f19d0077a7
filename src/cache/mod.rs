//! Cache layer for single-record lookups.
//!
//! The cache is never authoritative: every entry is reconstructible from the
//! backing store, so provider failures degrade to misses and writes are
//! best-effort. Coherence with the store is the job of [`CacheAside`], the
//! single point through which services read, refresh, and invalidate entries.

mod aside;
mod key;
mod memory_backend;
mod provider;
mod redis_backend;

pub use aside::CacheAside;
pub use key::derive_key;
pub use memory_backend::MemoryCache;
pub use provider::{CacheError, CacheProvider};
pub use redis_backend::RedisCache;

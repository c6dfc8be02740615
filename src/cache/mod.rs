//! Tiered response caching.
//!
//! Four versioned partitions (crisis, static shell, dynamic, media) behind a
//! storage trait, an ordered classification over intercepted requests, and
//! the strategy execution that decides when each partition is read, written,
//! and swept:
//! - `tier` names the partitions
//! - `store` persists snapshotted responses
//! - `strategy` classifies requests, first-match-wins
//! - `router` executes the matching strategy and owns the offline fallbacks
//! - `lifecycle` pre-warms on install and garbage-collects on activation

mod lifecycle;
mod router;
mod store;
mod strategy;
mod tier;

pub use lifecycle::LifecycleManager;
pub use router::CacheRouter;
pub use store::{normalized_url, request_key, CacheStore, CachedResponse, MemoryCacheStore, SqliteCacheStore};
pub use strategy::{Strategy, StrategyRules};
pub use tier::CacheTier;

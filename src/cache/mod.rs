//! Tiered cache storage for offline support.
//!
//! Four named, versioned partitions (static precache, runtime assets, API
//! responses, images) live in one SQLite store. The tier manager owns their
//! lifecycle: bulk precache at install, purge of stale versions at activate.

mod key;
mod store;
mod tiers;

pub use key::{normalize_url, request_key};
pub use store::{CachedResponse, SqliteStore, TierStore};
pub use tiers::{Tier, TierManager};

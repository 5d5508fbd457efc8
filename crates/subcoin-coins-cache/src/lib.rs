//! # Coins Cache Overview
//!
//! 1. Coins view cache.
//!     - [`CoinsViewCache`] overlays a base [`CoinsView`] (the coins database or another cache)
//!     with an in-memory map of recently touched coins.
//!     - Every entry is either `Clean`, `Dirty`, `Fresh` or a `Spent` tombstone, see [`CacheEntry`].
//! 2. Memory accounting.
//!     - The cache keeps a running estimate of its dynamic memory usage, driven by an injectable
//!     [`MemoryAccounting`] policy. Querying it is O(1).
//!     - Bucket storage of the underlying table is never reclaimed by a flush.
//! 3. Memory pressure.
//!     - [`classify`] maps the cache usage, the mempool usage and a [`PressureBudget`] into a
//!     [`PressureState`] that the flush scheduler acts on.
//! 4. Chainstate.
//!     - [`ChainstateCoins`] guards the cache tip behind a single coarse lock and implements
//!     [`FlushMode`] driven flushing.

mod cache;
mod chainstate;
mod coin;
mod entry;
mod error;
mod memusage;
mod metrics;
mod options;
#[cfg(feature = "cli")]
mod params;
mod pressure;
mod view;

#[cfg(test)]
mod tests;

pub use self::cache::{CacheStats, CoinsViewCache};
pub use self::chainstate::{ChainstateCoins, FlushMode, FlushOutcome, FlushReason};
pub use self::coin::{Coin, MAX_SCRIPT_SIZE};
pub use self::entry::CacheEntry;
pub use self::error::Error;
pub use self::memusage::{
    FlatAccounting, MemoryAccounting, NodeTableAccounting, PointerWidth, SCRIPT_INLINE_CAPACITY,
    malloc_usage, script_heap_usage,
};
pub use self::metrics::{Metrics, PrometheusError};
pub use self::options::{CoinsCacheOptions, CoinsCacheOptionsBuilder};
#[cfg(feature = "cli")]
pub use self::params::CoinsCacheParams;
pub use self::pressure::{
    DEFAULT_LARGE_HEADROOM_BYTES, MempoolUsage, PressureBudget, PressureState, classify,
};
pub use self::view::{BestBlock, CoinChange, CoinsBatch, CoinsView, DbStats, MemoryCoinsDb};

/// Result type for coins cache operations.
pub type Result<T> = std::result::Result<T, Error>;

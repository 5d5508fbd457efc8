use crate::memusage::PointerWidth;
use crate::pressure::{DEFAULT_LARGE_HEADROOM_BYTES, PressureBudget};
use std::time::Duration;

/// Default coins cache budget, 450 MiB.
pub const DEFAULT_COINS_CACHE_BYTES: usize = 450 << 20;

/// Default mempool budget, 300 MB.
pub const DEFAULT_MEMPOOL_BYTES: usize = 300 * 1_000_000;

/// Default interval between periodic flushes.
pub const DEFAULT_PERIODIC_FLUSH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configuration options for the coins cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinsCacheOptions {
    /// Maximum coins cache size in bytes (default: 450 MiB)
    pub max_coins_cache_bytes: usize,

    /// Maximum mempool size in bytes (default: 300 MB)
    ///
    /// Whatever the mempool does not use is lent to the coins cache.
    pub max_mempool_bytes: usize,

    /// Absolute width of the LARGE band for large budgets (default: 10 MiB)
    pub large_headroom_bytes: usize,

    /// Interval after which a periodic flush writes the cache regardless of pressure
    pub periodic_flush_interval: Duration,

    /// Pointer width the memory estimate is computed for
    pub pointer_width: PointerWidth,
}

impl Default for CoinsCacheOptions {
    fn default() -> Self {
        Self {
            max_coins_cache_bytes: DEFAULT_COINS_CACHE_BYTES,
            max_mempool_bytes: DEFAULT_MEMPOOL_BYTES,
            large_headroom_bytes: DEFAULT_LARGE_HEADROOM_BYTES,
            periodic_flush_interval: DEFAULT_PERIODIC_FLUSH_INTERVAL,
            pointer_width: PointerWidth::NATIVE,
        }
    }
}

impl CoinsCacheOptions {
    /// Create new coins cache options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuring coins cache options
    pub fn builder() -> CoinsCacheOptionsBuilder {
        CoinsCacheOptionsBuilder::default()
    }

    /// Budget the cache is classified against by default.
    pub fn pressure_budget(&self) -> PressureBudget {
        PressureBudget::new(self.max_coins_cache_bytes, self.max_mempool_bytes)
            .with_large_headroom(self.large_headroom_bytes)
    }
}

/// Builder pattern for CoinsCacheOptions
#[derive(Default)]
pub struct CoinsCacheOptionsBuilder {
    options: CoinsCacheOptions,
}

impl CoinsCacheOptionsBuilder {
    /// Set maximum coins cache size in bytes
    pub fn max_coins_cache_bytes(mut self, bytes: usize) -> Self {
        self.options.max_coins_cache_bytes = bytes;
        self
    }

    /// Set maximum coins cache size in MiB
    pub fn max_coins_cache_mb(mut self, mb: usize) -> Self {
        self.options.max_coins_cache_bytes = mb << 20;
        self
    }

    /// Set maximum mempool size in bytes
    pub fn max_mempool_bytes(mut self, bytes: usize) -> Self {
        self.options.max_mempool_bytes = bytes;
        self
    }

    /// Set maximum mempool size in MB
    pub fn max_mempool_mb(mut self, mb: usize) -> Self {
        self.options.max_mempool_bytes = mb * 1_000_000;
        self
    }

    /// Set the absolute LARGE headroom in bytes
    pub fn large_headroom_bytes(mut self, bytes: usize) -> Self {
        self.options.large_headroom_bytes = bytes;
        self
    }

    /// Set the periodic flush interval
    pub fn periodic_flush_interval(mut self, interval: Duration) -> Self {
        self.options.periodic_flush_interval = interval;
        self
    }

    /// Set the pointer width used for memory accounting
    pub fn pointer_width(mut self, width: PointerWidth) -> Self {
        self.options.pointer_width = width;
        self
    }

    /// Build the final CoinsCacheOptions
    pub fn build(self) -> CoinsCacheOptions {
        self.options
    }
}

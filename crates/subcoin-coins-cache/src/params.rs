use crate::options::CoinsCacheOptions;
use std::time::Duration;

/// Coins cache parameters.
#[derive(Debug, Clone, clap::Args)]
pub struct CoinsCacheParams {
    /// Maximum coins cache size in MiB.
    #[clap(long, default_value = "450")]
    pub dbcache: usize,

    /// Maximum mempool size in MB.
    ///
    /// Memory the mempool does not use is lent to the coins cache.
    #[clap(long, default_value = "300")]
    pub maxmempool: usize,

    /// Width of the LARGE pressure band in MiB for large cache budgets.
    #[clap(long, default_value = "10")]
    pub coins_cache_large_headroom: usize,

    /// Seconds between periodic flushes of the coins cache.
    #[clap(long, value_name = "SECS", default_value = "3600")]
    pub coins_flush_interval: u64,
}

impl From<CoinsCacheParams> for CoinsCacheOptions {
    fn from(params: CoinsCacheParams) -> Self {
        CoinsCacheOptions::builder()
            .max_coins_cache_mb(params.dbcache)
            .max_mempool_mb(params.maxmempool)
            .large_headroom_bytes(params.coins_cache_large_headroom << 20)
            .periodic_flush_interval(Duration::from_secs(params.coins_flush_interval))
            .build()
    }
}

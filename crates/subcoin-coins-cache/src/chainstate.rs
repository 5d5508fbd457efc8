//! Chainstate ownership of the coins cache and the flush scheduler.

use crate::Result;
use crate::cache::CoinsViewCache;
use crate::memusage::{MemoryAccounting, NodeTableAccounting};
use crate::metrics::Metrics;
use crate::options::CoinsCacheOptions;
use crate::pressure::{MempoolUsage, PressureBudget, PressureState};
use crate::view::CoinsView;
use parking_lot::{Mutex, MutexGuard};
use std::time::Instant;

const LOG_TARGET: &str = "coins-cache";

/// How eagerly [`ChainstateCoins::flush_state_to_disk`] writes the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum FlushMode {
    /// Never flush.
    None,
    /// Flush only when the cache is CRITICAL.
    IfNeeded,
    /// Flush when the cache is at least LARGE or the periodic interval has elapsed.
    Periodic,
    /// Flush unconditionally.
    Always,
}

/// Why a flush happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Requested by [`FlushMode::Always`].
    Always,
    /// The cache was LARGE during a periodic check.
    Large,
    /// The cache exceeded its budget.
    Critical,
    /// The periodic flush interval elapsed.
    Periodic,
}

impl FlushReason {
    /// Label used for the `reason` metric dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Large => "large",
            Self::Critical => "critical",
            Self::Periodic => "periodic",
        }
    }
}

/// Result of [`ChainstateCoins::flush_state_to_disk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was written, carries the observed pressure.
    Skipped(PressureState),
    /// The cache was flushed.
    Flushed {
        reason: FlushReason,
        /// Pressure right after the flush, the retained buckets may keep it above OK.
        state: PressureState,
    },
}

struct FlushState {
    last_flush: Instant,
    last_state: Option<PressureState>,
}

/// Owner of the coins cache tip of the active chainstate.
///
/// ## Lock Hierarchy
///
/// 1. `coins_tip`: coarse ledger-state lock, held for the whole of a flush decision.
/// 2. `flush_state`: bookkeeping of the scheduler, only taken while holding `coins_tip`.
pub struct ChainstateCoins<V, A = NodeTableAccounting> {
    options: CoinsCacheOptions,
    coins_tip: Mutex<CoinsViewCache<V, A>>,
    flush_state: Mutex<FlushState>,
    metrics: Option<Metrics>,
}

impl<V: CoinsView> ChainstateCoins<V> {
    /// Constructs the chainstate coins over `base`, accounted for the configured pointer width.
    pub fn new(base: V, options: CoinsCacheOptions) -> Self {
        let accounting = NodeTableAccounting::new(options.pointer_width);
        Self::with_accounting(base, accounting, options)
    }
}

impl<V: CoinsView, A: MemoryAccounting> ChainstateCoins<V, A> {
    /// Constructs the chainstate coins with a custom accounting policy.
    pub fn with_accounting(base: V, accounting: A, options: CoinsCacheOptions) -> Self {
        Self {
            options,
            coins_tip: Mutex::new(CoinsViewCache::with_accounting(base, accounting)),
            flush_state: Mutex::new(FlushState {
                last_flush: Instant::now(),
                last_state: None,
            }),
            metrics: None,
        }
    }

    /// Attaches prometheus metrics.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the options the chainstate was built with.
    pub fn options(&self) -> &CoinsCacheOptions {
        &self.options
    }

    /// Locks and returns the coins cache tip.
    pub fn coins_tip(&self) -> MutexGuard<'_, CoinsViewCache<V, A>> {
        self.coins_tip.lock()
    }

    /// Classifies the cache tip against explicit budgets.
    ///
    /// The LARGE headroom is taken from the options.
    pub fn get_pressure_state(
        &self,
        pool_usage: usize,
        max_coins_cache_bytes: usize,
        max_mempool_bytes: usize,
    ) -> PressureState {
        let budget = PressureBudget::new(max_coins_cache_bytes, max_mempool_bytes)
            .with_large_headroom(self.options.large_headroom_bytes);
        self.coins_tip().pressure_state(pool_usage, &budget)
    }

    /// Classifies the cache tip against the configured budgets.
    pub fn pressure_state(&self, mempool: &impl MempoolUsage) -> PressureState {
        let tip = self.coins_tip.lock();
        let state = tip.pressure_state(
            mempool.dynamic_memory_usage(),
            &self.options.pressure_budget(),
        );
        self.observe(&tip, state, &mut self.flush_state.lock());
        state
    }

    /// Flushes the cache tip to the base view if `mode` and the current pressure ask for it.
    ///
    /// A failed flush leaves every modification in the cache so that a later call can retry.
    pub fn flush_state_to_disk(
        &self,
        mode: FlushMode,
        mempool: &impl MempoolUsage,
    ) -> Result<FlushOutcome> {
        let mut tip = self.coins_tip.lock();
        let mut flush_state = self.flush_state.lock();

        let pool_usage = mempool.dynamic_memory_usage();
        let budget = self.options.pressure_budget();
        let state = tip.pressure_state(pool_usage, &budget);
        self.observe(&tip, state, &mut flush_state);

        let periodic_due =
            flush_state.last_flush.elapsed() >= self.options.periodic_flush_interval;

        let reason = match mode {
            FlushMode::None => None,
            FlushMode::Always => Some(FlushReason::Always),
            _ if state == PressureState::Critical => Some(FlushReason::Critical),
            FlushMode::Periodic if state == PressureState::Large => Some(FlushReason::Large),
            FlushMode::Periodic if periodic_due => Some(FlushReason::Periodic),
            FlushMode::IfNeeded | FlushMode::Periodic => None,
        };

        let Some(reason) = reason else {
            return Ok(FlushOutcome::Skipped(state));
        };

        // Retained buckets can keep an empty cache above budget, there is nothing to write.
        if tip.is_flushed() {
            tracing::trace!(
                target: LOG_TARGET,
                reason = reason.as_str(),
                "Coins cache tip already flushed ({state})",
            );
            return Ok(FlushOutcome::Skipped(state));
        }

        let usage_before = tip.dynamic_memory_usage();

        if let Err(err) = tip.flush() {
            if let Some(metrics) = &self.metrics {
                metrics.report_flush_failure();
            }
            return Err(err);
        }

        flush_state.last_flush = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.report_flush(reason);
        }

        let state_after = tip.pressure_state(pool_usage, &budget);
        self.observe(&tip, state_after, &mut flush_state);

        tracing::debug!(
            target: LOG_TARGET,
            ?mode,
            reason = reason.as_str(),
            usage_before,
            usage_after = tip.dynamic_memory_usage(),
            "Flushed coins cache tip ({state} -> {state_after})",
        );

        Ok(FlushOutcome::Flushed {
            reason,
            state: state_after,
        })
    }

    fn observe(
        &self,
        tip: &CoinsViewCache<V, A>,
        state: PressureState,
        flush_state: &mut FlushState,
    ) {
        if let Some(metrics) = &self.metrics {
            metrics.report_cache(tip.dynamic_memory_usage(), tip.cache_size(), state);
        }

        if flush_state.last_state.replace(state) != Some(state) {
            tracing::info!(
                target: LOG_TARGET,
                "Coins cache pressure is {state} ({} bytes, {} entries)",
                tip.dynamic_memory_usage(),
                tip.cache_size(),
            );
        }
    }
}

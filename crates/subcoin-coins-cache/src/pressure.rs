//! Memory pressure classification of the coins cache.

use std::sync::Arc;

/// Default absolute width of the LARGE band, 10 MiB.
///
/// Large budgets warn this many bytes before the limit, small ones fall back to the last 10%.
pub const DEFAULT_LARGE_HEADROOM_BYTES: usize = 10 << 20;

/// Memory pressure of the coins cache, ordered `Ok < Large < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureState {
    /// Usage is comfortably within budget.
    Ok,
    /// Usage is approaching the budget, a flush should be scheduled.
    Large,
    /// Usage exceeds the budget, a flush is required.
    Critical,
}

impl PressureState {
    /// Whether the state asks for a flush at all.
    pub fn needs_flush(self) -> bool {
        self >= Self::Large
    }

    /// Numeric value exported as a gauge.
    pub fn as_gauge(self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::Large => 1,
            Self::Critical => 2,
        }
    }
}

impl std::fmt::Display for PressureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Large => write!(f, "LARGE"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Memory ceilings the coins cache is classified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressureBudget {
    /// Bytes reserved for the coins cache.
    pub max_cache_bytes: usize,
    /// Bytes reserved for the mempool, the unused part is lent to the coins cache.
    pub max_pool_bytes: usize,
    /// Absolute width of the LARGE band for large budgets.
    pub large_headroom_bytes: usize,
}

impl PressureBudget {
    /// Constructs a budget with the default LARGE headroom.
    pub fn new(max_cache_bytes: usize, max_pool_bytes: usize) -> Self {
        Self {
            max_cache_bytes,
            max_pool_bytes,
            large_headroom_bytes: DEFAULT_LARGE_HEADROOM_BYTES,
        }
    }

    /// Constructs a budget that ignores the mempool entirely.
    pub fn cache_only(max_cache_bytes: usize) -> Self {
        Self::new(max_cache_bytes, 0)
    }

    /// Overrides the LARGE headroom.
    pub fn with_large_headroom(mut self, large_headroom_bytes: usize) -> Self {
        self.large_headroom_bytes = large_headroom_bytes;
        self
    }

    /// Bytes available to the coins cache given the current mempool usage.
    pub fn total_space(&self, pool_usage: usize) -> usize {
        self.max_cache_bytes
            .saturating_add(self.max_pool_bytes.saturating_sub(pool_usage))
    }

    /// Usage above which the cache is classified as [`PressureState::Large`].
    pub fn large_threshold(&self, pool_usage: usize) -> usize {
        let total = self.total_space(pool_usage);
        let relative = (total as u128 * 9 / 10) as usize;
        relative.max(total.saturating_sub(self.large_headroom_bytes))
    }
}

/// Classifies `cache_usage` against `budget`.
///
/// Pure and monotonic: raising `cache_usage` with everything else fixed never lowers the
/// returned state.
pub fn classify(cache_usage: usize, pool_usage: usize, budget: &PressureBudget) -> PressureState {
    if cache_usage > budget.total_space(pool_usage) {
        PressureState::Critical
    } else if cache_usage > budget.large_threshold(pool_usage) {
        PressureState::Large
    } else {
        PressureState::Ok
    }
}

/// Source of the mempool memory usage competing with the coins cache.
pub trait MempoolUsage {
    /// Dynamic memory currently used by the mempool.
    fn dynamic_memory_usage(&self) -> usize;
}

/// A fixed reported usage, `0` for callers without a mempool.
impl MempoolUsage for usize {
    fn dynamic_memory_usage(&self) -> usize {
        *self
    }
}

impl<T: MempoolUsage + ?Sized> MempoolUsage for &T {
    fn dynamic_memory_usage(&self) -> usize {
        (**self).dynamic_memory_usage()
    }
}

impl<T: MempoolUsage + ?Sized> MempoolUsage for Arc<T> {
    fn dynamic_memory_usage(&self) -> usize {
        (**self).dynamic_memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(PressureState::Ok < PressureState::Large);
        assert!(PressureState::Large < PressureState::Critical);
        assert!(!PressureState::Ok.needs_flush());
        assert!(PressureState::Large.needs_flush());
        assert!(PressureState::Critical.needs_flush());
        assert_eq!(PressureState::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_small_budget_uses_relative_band() {
        let budget = PressureBudget::cache_only(1024);

        assert_eq!(budget.total_space(0), 1024);
        assert_eq!(budget.large_threshold(0), 921);
        assert_eq!(classify(921, 0, &budget), PressureState::Ok);
        assert_eq!(classify(922, 0, &budget), PressureState::Large);
        assert_eq!(classify(1024, 0, &budget), PressureState::Large);
        assert_eq!(classify(1025, 0, &budget), PressureState::Critical);
    }

    #[test]
    fn test_large_budget_uses_absolute_band() {
        let gib = 1usize << 30;
        let budget = PressureBudget::cache_only(gib);

        assert_eq!(budget.large_threshold(0), gib - DEFAULT_LARGE_HEADROOM_BYTES);
        assert_eq!(
            classify(gib - DEFAULT_LARGE_HEADROOM_BYTES, 0, &budget),
            PressureState::Ok
        );
        assert_eq!(
            classify(gib - DEFAULT_LARGE_HEADROOM_BYTES + 1, 0, &budget),
            PressureState::Large
        );

        let narrow = budget.with_large_headroom(1 << 20);
        assert_eq!(classify(gib - (2 << 20), 0, &narrow), PressureState::Ok);
    }

    #[test]
    fn test_idle_budget_is_ok() {
        for max_cache in [1, 2, 10, 1024, 1 << 20, 450 << 20] {
            for max_pool in [0, 1, 300_000_000] {
                let budget = PressureBudget::new(max_cache, max_pool);
                assert_eq!(classify(0, 0, &budget), PressureState::Ok);
            }
        }
    }

    #[test]
    fn test_zero_budget_is_critical_with_any_usage() {
        let budget = PressureBudget::cache_only(0);

        assert_eq!(classify(0, 0, &budget), PressureState::Ok);
        assert_eq!(classify(1, 0, &budget), PressureState::Critical);
    }

    #[test]
    fn test_budget_donation() {
        let (cache, pool) = (1024, 1856);
        let budget = PressureBudget::new(cache, pool);

        for epsilon in [1, 10, 100] {
            assert_ne!(classify(cache + pool - epsilon, 0, &budget), PressureState::Critical);
            assert_eq!(classify(cache + pool + epsilon, 0, &budget), PressureState::Critical);
        }

        // A busy mempool takes its share back.
        assert_eq!(classify(cache + 1, pool, &budget), PressureState::Critical);
        assert_eq!(classify(cache + 1, pool * 2, &budget), PressureState::Critical);
        assert_eq!(classify(cache + 1, pool - 100, &budget), PressureState::Large);
    }

    #[test]
    fn test_classifier_is_monotonic() {
        let budgets = [
            PressureBudget::cache_only(0),
            PressureBudget::cache_only(1024),
            PressureBudget::new(1024, 1856),
            PressureBudget::new(5000, 300).with_large_headroom(100),
            PressureBudget::new(100, 100).with_large_headroom(0),
        ];

        for budget in budgets {
            for pool_usage in [0, 50, 300, 5000] {
                let mut previous = PressureState::Ok;
                for usage in 0..8000 {
                    let state = classify(usage, pool_usage, &budget);
                    assert!(
                        state >= previous,
                        "state went from {previous} to {state} at usage {usage} ({budget:?})"
                    );
                    previous = state;
                }
            }
        }
    }

    #[test]
    fn test_mempool_usage_impls() {
        let fixed = 42usize;
        assert_eq!(fixed.dynamic_memory_usage(), 42);
        assert_eq!((&fixed).dynamic_memory_usage(), 42);
        assert_eq!(Arc::new(7usize).dynamic_memory_usage(), 7);
    }
}

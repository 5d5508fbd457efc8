use crate::chainstate::FlushReason;
use crate::pressure::PressureState;
use prometheus::core::Collector;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub use prometheus::Error as PrometheusError;

fn register<T: Collector + Clone + 'static>(
    metric: T,
    registry: &Registry,
) -> Result<T, PrometheusError> {
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

/// Prometheus metrics of the coins cache.
#[derive(Clone)]
pub struct Metrics {
    usage_bytes: IntGauge,
    entries: IntGauge,
    pressure_state: IntGauge,
    flushes: IntCounterVec,
    flush_failures: IntCounter,
}

impl Metrics {
    pub fn register(registry: &Registry) -> Result<Self, PrometheusError> {
        Ok(Self {
            usage_bytes: register(
                IntGauge::new(
                    "subcoin_coins_cache_usage_bytes",
                    "Estimated dynamic memory usage of the coins cache in bytes",
                )?,
                registry,
            )?,
            entries: register(
                IntGauge::new(
                    "subcoin_coins_cache_entries",
                    "Number of entries in the coins cache",
                )?,
                registry,
            )?,
            pressure_state: register(
                IntGauge::new(
                    "subcoin_coins_cache_pressure_state",
                    "Memory pressure of the coins cache (0 = OK, 1 = LARGE, 2 = CRITICAL)",
                )?,
                registry,
            )?,
            flushes: register(
                IntCounterVec::new(
                    Opts::new(
                        "subcoin_coins_cache_flushes_total",
                        "Number of coins cache flushes",
                    ),
                    &["reason"],
                )?,
                registry,
            )?,
            flush_failures: register(
                IntCounter::new(
                    "subcoin_coins_cache_flush_failures_total",
                    "Number of failed coins cache flushes",
                )?,
                registry,
            )?,
        })
    }

    pub fn report_cache(&self, usage: usize, entries: usize, state: PressureState) {
        self.usage_bytes.set(usage as i64);
        self.entries.set(entries as i64);
        self.pressure_state.set(state.as_gauge());
    }

    pub fn report_flush(&self, reason: FlushReason) {
        self.flushes.with_label_values(&[reason.as_str()]).inc();
    }

    pub fn report_flush_failure(&self) {
        self.flush_failures.inc();
    }
}

//! Run counters, exported as Prometheus text when the `metrics` feature is on.

#[cfg(feature = "metrics")]
mod enabled {
    use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

    pub struct Metrics {
        registry: Registry,
        ticks: IntCounterVec,
        address_failures: IntCounter,
        roster_size: IntGauge,
    }

    impl Metrics {
        pub fn new() -> anyhow::Result<Self> {
            let registry = Registry::new();
            let ticks = IntCounterVec::new(
                Opts::new("positioning_ticks_total", "Ticks by outcome"),
                &["outcome"],
            )?;
            let address_failures = IntCounter::new(
                "positioning_address_failures_total",
                "Per-address position fetch failures",
            )?;
            let roster_size = IntGauge::new("positioning_roster_size", "Addresses currently tracked")?;

            registry.register(Box::new(ticks.clone()))?;
            registry.register(Box::new(address_failures.clone()))?;
            registry.register(Box::new(roster_size.clone()))?;

            Ok(Self { registry, ticks, address_failures, roster_size })
        }

        pub fn record_tick(&self, outcome: &str) {
            self.ticks.with_label_values(&[outcome]).inc();
        }

        pub fn record_address_failures(&self, count: usize) {
            self.address_failures.inc_by(count as u64);
        }

        pub fn set_roster_size(&self, size: usize) {
            self.roster_size.set(size as i64);
        }

        pub fn render(&self) -> Option<String> {
            let mut buf = Vec::new();
            TextEncoder::new().encode(&self.registry.gather(), &mut buf).ok()?;
            String::from_utf8(buf).ok()
        }
    }
}

#[cfg(not(feature = "metrics"))]
mod enabled {
    /// No-op stand-in when built without `metrics`.
    pub struct Metrics;

    impl Metrics {
        pub fn new() -> anyhow::Result<Self> {
            Ok(Metrics)
        }

        pub fn record_tick(&self, _outcome: &str) {}

        pub fn record_address_failures(&self, _count: usize) {}

        pub fn set_roster_size(&self, _size: usize) {}

        pub fn render(&self) -> Option<String> {
            None
        }
    }
}

pub use enabled::Metrics;

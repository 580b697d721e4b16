use surge_metrics::{MetricHandle, MetricKind, Registry};

use super::config::MetricDecl;
use super::error::Result;

pub mod names {
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const ITERATION_FAILED: &str = "iteration_failed";
    pub const VUS: &str = "vus";
    pub const VUS_MAX: &str = "vus_max";
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const CHECKS: &str = "checks";
}

/// Metrics every run registers before the first virtual user starts.
pub const BUILTIN_METRICS: &[(&str, MetricKind)] = &[
    (names::ITERATIONS, MetricKind::Counter),
    (names::ITERATION_DURATION, MetricKind::Trend),
    (names::ITERATION_FAILED, MetricKind::Rate),
    (names::VUS, MetricKind::Gauge),
    (names::VUS_MAX, MetricKind::Gauge),
    (names::HTTP_REQS, MetricKind::Counter),
    (names::HTTP_REQ_DURATION, MetricKind::Trend),
    (names::HTTP_REQ_FAILED, MetricKind::Rate),
    (names::CHECKS, MetricKind::Rate),
];

pub(crate) fn register_all(registry: &Registry, custom: &[MetricDecl]) -> Result<()> {
    for (name, kind) in BUILTIN_METRICS {
        registry.register(name, *kind)?;
    }
    for decl in custom {
        registry.register(&decl.name, decl.kind)?;
    }
    Ok(())
}

/// Handles the engine itself writes to.
#[derive(Debug, Clone)]
pub(crate) struct EngineMetrics {
    pub(crate) iterations: MetricHandle,
    pub(crate) iteration_duration: MetricHandle,
    pub(crate) iteration_failed: MetricHandle,
    pub(crate) vus: MetricHandle,
    pub(crate) vus_max: MetricHandle,
}

impl EngineMetrics {
    pub(crate) fn new(registry: &Registry) -> Result<Self> {
        let handle = |name: &str| {
            registry
                .handle(name)
                .ok_or_else(|| surge_metrics::Error::UnknownMetric(name.to_string()))
        };

        Ok(Self {
            iterations: handle(names::ITERATIONS)?,
            iteration_duration: handle(names::ITERATION_DURATION)?,
            iteration_failed: handle(names::ITERATION_FAILED)?,
            vus: handle(names::VUS)?,
            vus_max: handle(names::VUS_MAX)?,
        })
    }

    pub(crate) fn set_live(&self, live: usize) {
        let live = i64::try_from(live).unwrap_or(i64::MAX);
        self.vus.set_gauge(live);
        self.vus_max.max_gauge(live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_metric_conflicting_with_builtin_is_rejected() {
        let registry = Registry::new();
        let err = register_all(
            &registry,
            &[MetricDecl {
                name: names::CHECKS.to_string(),
                kind: MetricKind::Counter,
            }],
        );
        assert!(err.is_err());
    }

    #[test]
    fn vus_max_tracks_peak() {
        let registry = Registry::new();
        register_all(&registry, &[]).unwrap_or_else(|e| panic!("{e}"));
        let m = EngineMetrics::new(&registry).unwrap_or_else(|e| panic!("{e}"));

        m.set_live(3);
        m.set_live(8);
        m.set_live(2);

        let value = |name: &str| {
            registry
                .snapshot(name)
                .unwrap_or_else(|| panic!("missing {name}"))
                .value
        };
        assert!(matches!(value(names::VUS), surge_metrics::MetricValue::Gauge(2)));
        assert!(matches!(value(names::VUS_MAX), surge_metrics::MetricValue::Gauge(8)));
    }
}

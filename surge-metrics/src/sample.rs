use std::sync::Arc;
use std::time::Duration;

use crate::MetricKind;

/// A single observation routed to the metric with the matching name.
#[derive(Debug, Clone)]
pub struct Sample {
    pub metric: Arc<str>,
    pub value: SampleValue,
}

impl Sample {
    pub fn new(metric: impl Into<Arc<str>>, value: SampleValue) -> Self {
        Self {
            metric: metric.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    /// Counter increment.
    Count(u64),
    /// Rate observation.
    Bool(bool),
    /// Trend sample.
    Value(f64),
    /// Gauge assignment.
    Gauge(i64),
}

impl SampleValue {
    /// Trend sample for a duration, in milliseconds.
    #[must_use]
    pub fn millis(d: Duration) -> Self {
        Self::Value(d.as_secs_f64() * 1000.0)
    }

    /// Kind of metric this value can be recorded into.
    #[must_use]
    pub fn kind(self) -> MetricKind {
        match self {
            Self::Count(_) => MetricKind::Counter,
            Self::Bool(_) => MetricKind::Rate,
            Self::Value(_) => MetricKind::Trend,
            Self::Gauge(_) => MetricKind::Gauge,
        }
    }
}

impl From<bool> for SampleValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        Self::Value(v)
    }
}

impl From<Duration> for SampleValue {
    fn from(v: Duration) -> Self {
        Self::millis(v)
    }
}

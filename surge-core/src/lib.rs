pub mod runner;

pub use runner::*;
pub use surge_metrics::{
    MetricKind, MetricSnapshot, MetricValue, RateSummary, Registry, Sample, SampleValue,
    TrendSummary,
};

pub mod error;
pub mod metrics;
pub mod registry;
pub mod sample;

pub use error::{Error, Result};
pub use metrics::{
    MetricHandle, MetricKind, MetricSnapshot, MetricValue, RateSummary, TrendSummary, percentile,
};
pub use registry::{MetricId, Registry};
pub use sample::{Sample, SampleValue};

use crate::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered as {existing}, cannot register it as {requested}")]
    KindConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{name}` is a {kind} metric, got a {sample} sample")]
    SampleKindMismatch {
        name: String,
        kind: MetricKind,
        sample: MetricKind,
    },
}

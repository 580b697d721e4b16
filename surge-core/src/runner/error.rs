use surge_metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors. All of them are raised before any virtual user starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    EmptyStages,

    #[error("stage {index} has a zero duration")]
    ZeroStageDuration { index: usize },

    #[error("invalid threshold `{expression}` for metric `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("threshold `{expression}` cannot be applied to {kind} metric `{metric}`")]
    ThresholdKindMismatch {
        metric: String,
        expression: String,
        kind: MetricKind,
    },

    #[error("think time `min` must not exceed `max`")]
    InvalidThinkTime,

    #[error("poll interval must be a positive duration")]
    InvalidPollInterval,

    #[error("tier rule `{0}` must set a finite error-rate and latency bound")]
    InvalidTierRule(String),

    #[error(transparent)]
    Metrics(#[from] surge_metrics::Error),
}

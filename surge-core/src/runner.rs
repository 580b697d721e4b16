mod config;
mod error;
mod metrics;
mod pool;
mod progress;
mod report;
mod run;
mod schedule;
mod stats;
mod thresholds;
mod vu;

pub use config::{MetricDecl, RunProfile, RunProfileBuilder, Stage, ThinkTime};
pub use error::{Error, Result};
pub use metrics::{BUILTIN_METRICS, names as metric_names};
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use report::{Assessment, TierRule, render_summary};
pub use run::{RunControl, run};
pub use schedule::{StageSchedule, StageSnapshot};
pub use stats::RunResult;
pub use thresholds::{
    Threshold, ThresholdExpr, ThresholdOp, ThresholdOutcome, ThresholdSet, ThresholdStat,
    evaluate_thresholds, parse_threshold_expr,
};
pub use vu::{IterationContext, IterationOutcome};

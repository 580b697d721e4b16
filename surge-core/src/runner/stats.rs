use std::time::Duration;

use serde::{Serialize, Serializer};
use surge_metrics::{MetricSnapshot, MetricValue};

use super::thresholds::ThresholdOutcome;

/// Outcome of one run, produced after every virtual user has stopped.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Final metric values, sorted by name.
    pub metrics: Vec<MetricSnapshot>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub passed: bool,
    #[serde(rename = "duration_secs", serialize_with = "as_secs_f64")]
    pub duration: Duration,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl RunResult {
    pub(crate) fn new(
        metrics: Vec<MetricSnapshot>,
        thresholds: Vec<ThresholdOutcome>,
        duration: Duration,
        abort_reason: Option<String>,
    ) -> Self {
        let passed = thresholds.iter().all(|t| t.passed);
        Self {
            metrics,
            thresholds,
            passed,
            duration,
            aborted: abort_reason.is_some(),
            abort_reason,
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.value)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed)
    }
}

fn as_secs_f64<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_metrics::MetricKind;

    fn outcome(passed: bool) -> ThresholdOutcome {
        ThresholdOutcome {
            metric: "m".to_string(),
            expression: "count>0".to_string(),
            observed: Some(1.0),
            passed,
            reason: None,
        }
    }

    #[test]
    fn passes_only_when_every_threshold_holds() {
        let with = |outcomes| RunResult::new(vec![], outcomes, Duration::ZERO, None);

        let ok = with(vec![outcome(true), outcome(true)]);
        assert!(ok.passed);

        let failed = with(vec![outcome(true), outcome(false)]);
        assert!(!failed.passed);
        assert_eq!(failed.failed_thresholds().count(), 1);

        let none = with(vec![]);
        assert!(none.passed);
    }

    #[test]
    fn serializes_duration_in_seconds_and_abort_reason() {
        let result = RunResult::new(
            vec![MetricSnapshot {
                name: "iterations".to_string(),
                kind: MetricKind::Counter,
                value: MetricValue::Counter(3),
            }],
            vec![],
            Duration::from_millis(1_500),
            Some("interrupted".to_string()),
        );
        let json = serde_json::to_value(&result).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(json["duration_secs"], 1.5);
        assert_eq!(json["aborted"], true);
        assert_eq!(json["abort_reason"], "interrupted");
        assert_eq!(json["metrics"][0]["name"], "iterations");
        assert_eq!(json["metrics"][0]["kind"], "counter");
        assert_eq!(json["metrics"][0]["value"], 3);
    }
}

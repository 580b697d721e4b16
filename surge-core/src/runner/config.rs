use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use surge_metrics::{MetricKind, Registry};

use super::error::{Error, Result};
use super::metrics;
use super::report::Assessment;
use super::schedule::StageSchedule;
use super::thresholds::{Threshold, ThresholdSet, parse_threshold_expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDecl {
    pub name: String,
    pub kind: MetricKind,
}

/// Delay between iterations, drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min: Duration,
    pub max: Duration,
}

impl ThinkTime {
    pub fn fixed(d: Duration) -> Self {
        Self { min: d, max: d }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_nanos() as u64;
        let max = self.max.as_nanos().min(u128::from(u64::MAX)) as u64;
        Duration::from_nanos(rng.random_range(min..=max))
    }
}

/// Everything a run needs, validated up front. Immutable once built.
#[derive(Debug, Clone)]
pub struct RunProfile {
    schedule: StageSchedule,
    thresholds: Vec<ThresholdSet>,
    base_url: Arc<str>,
    metrics: Vec<MetricDecl>,
    think_time: Option<ThinkTime>,
    poll_interval: Duration,
    assessment: Assessment,
}

impl RunProfile {
    pub fn builder() -> RunProfileBuilder {
        RunProfileBuilder::default()
    }

    pub fn schedule(&self) -> &StageSchedule {
        &self.schedule
    }

    pub fn stages(&self) -> &[Stage] {
        self.schedule.stages()
    }

    pub fn thresholds(&self) -> &[ThresholdSet] {
        &self.thresholds
    }

    pub fn base_url(&self) -> &Arc<str> {
        &self.base_url
    }

    pub fn metrics(&self) -> &[MetricDecl] {
        &self.metrics
    }

    pub fn think_time(&self) -> Option<ThinkTime> {
        self.think_time
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn assessment(&self) -> &Assessment {
        &self.assessment
    }

    pub fn has_abort_on_fail(&self) -> bool {
        self.thresholds
            .iter()
            .any(|s| s.thresholds.iter().any(|t| t.abort_on_fail))
    }
}

#[derive(Debug, Clone)]
pub struct RunProfileBuilder {
    stages: Vec<Stage>,
    // (metric, expression, abort_on_fail), kept in declaration order.
    thresholds: Vec<(String, String, bool)>,
    base_url: String,
    metrics: Vec<MetricDecl>,
    think_time: Option<ThinkTime>,
    poll_interval: Duration,
    assessment: Assessment,
}

impl Default for RunProfileBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            thresholds: Vec::new(),
            base_url: String::new(),
            metrics: Vec::new(),
            think_time: None,
            poll_interval: Duration::from_secs(1),
            assessment: Assessment::default(),
        }
    }
}

impl RunProfileBuilder {
    pub fn stage(mut self, duration: Duration, target: u64) -> Self {
        self.stages.push(Stage { duration, target });
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn threshold(mut self, metric: impl Into<String>, expression: impl Into<String>) -> Self {
        self.thresholds
            .push((metric.into(), expression.into(), false));
        self
    }

    /// Threshold that aborts the run as soon as it fails during the run.
    pub fn abort_on_fail_threshold(
        mut self,
        metric: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.thresholds
            .push((metric.into(), expression.into(), true));
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn metric(mut self, name: impl Into<String>, kind: MetricKind) -> Self {
        self.metrics.push(MetricDecl {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = Some(think_time);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn assessment(mut self, assessment: Assessment) -> Self {
        self.assessment = assessment;
        self
    }

    pub fn build(self) -> Result<RunProfile> {
        let schedule = StageSchedule::new(self.stages)?;

        if self.poll_interval.is_zero() {
            return Err(Error::InvalidPollInterval);
        }
        if self.think_time.is_some_and(|t| t.min > t.max) {
            return Err(Error::InvalidThinkTime);
        }
        self.assessment.validate()?;

        // Same registration the run does, so kind conflicts surface here.
        let kinds = Registry::new();
        metrics::register_all(&kinds, &self.metrics)?;

        let mut by_metric: BTreeMap<String, Vec<Threshold>> = BTreeMap::new();
        for (metric, source, abort_on_fail) in self.thresholds {
            let expr = parse_threshold_expr(&source).map_err(|reason| Error::InvalidThreshold {
                metric: metric.clone(),
                expression: source.clone(),
                reason,
            })?;

            if let Some(kind) = kinds.kind(&metric) {
                if !expr.stat.applies_to(kind) {
                    return Err(Error::ThresholdKindMismatch {
                        metric,
                        expression: source,
                        kind,
                    });
                }
            }

            by_metric.entry(metric).or_default().push(Threshold {
                source,
                expr,
                abort_on_fail,
            });
        }

        let thresholds = by_metric
            .into_iter()
            .map(|(metric, thresholds)| ThresholdSet { metric, thresholds })
            .collect();

        Ok(RunProfile {
            schedule,
            thresholds,
            base_url: Arc::from(self.base_url),
            metrics: self.metrics,
            think_time: self.think_time,
            poll_interval: self.poll_interval,
            assessment: self.assessment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn base() -> RunProfileBuilder {
        RunProfile::builder().stage(Duration::from_secs(10), 5)
    }

    #[test]
    fn builds_profile_with_grouped_thresholds() {
        let profile = base()
            .metric("errors", MetricKind::Rate)
            .threshold("http_req_duration", "p(95)<5000")
            .threshold("errors", "rate<0.15")
            .abort_on_fail_threshold("http_req_duration", "avg<2000")
            .base_url("http://localhost:3000")
            .build()
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(profile.stages().len(), 1);
        assert_eq!(profile.base_url().as_ref(), "http://localhost:3000");
        assert_eq!(profile.poll_interval(), Duration::from_secs(1));
        assert!(profile.has_abort_on_fail());

        let sets = profile.thresholds();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].metric, "errors");
        assert_eq!(sets[1].metric, "http_req_duration");
        assert_eq!(sets[1].thresholds.len(), 2);
        assert_eq!(sets[1].thresholds[0].source, "p(95)<5000");
        assert!(sets[1].thresholds[1].abort_on_fail);
    }

    #[test]
    fn empty_stages_fail_fast() {
        let err = RunProfile::builder().build().err();
        assert_eq!(err, Some(Error::EmptyStages));
    }

    #[test]
    fn malformed_threshold_is_a_configuration_error() {
        let err = base().threshold("http_req_duration", "p95<1").build().err();
        assert!(matches!(
            err,
            Some(Error::InvalidThreshold { ref metric, .. }) if metric == "http_req_duration"
        ));
    }

    #[test]
    fn threshold_statistic_must_fit_metric_kind() {
        let err = base().threshold("http_req_failed", "p(95)<1").build().err();
        assert!(matches!(
            err,
            Some(Error::ThresholdKindMismatch {
                kind: MetricKind::Rate,
                ..
            })
        ));
    }

    #[test]
    fn thresholds_on_unknown_metrics_are_accepted() {
        // They fail closed at evaluation time.
        let profile = base().threshold("not_a_metric", "count>0").build();
        assert!(profile.is_ok());
    }

    #[test]
    fn conflicting_metric_declaration_is_rejected() {
        let err = base()
            .metric("total_requests", MetricKind::Counter)
            .metric("total_requests", MetricKind::Rate)
            .build()
            .err();
        assert!(matches!(
            err,
            Some(Error::Metrics(surge_metrics::Error::KindConflict { .. }))
        ));
    }

    #[test]
    fn rejects_bad_think_time_and_poll_interval() {
        let err = base()
            .think_time(ThinkTime {
                min: Duration::from_secs(2),
                max: Duration::from_secs(1),
            })
            .build()
            .err();
        assert_eq!(err, Some(Error::InvalidThinkTime));

        let err = base().poll_interval(Duration::ZERO).build().err();
        assert_eq!(err, Some(Error::InvalidPollInterval));
    }

    #[test]
    fn think_time_samples_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = ThinkTime {
            min: Duration::from_millis(50),
            max: Duration::from_millis(150),
        };
        for _ in 0..1_000 {
            let d = t.sample(&mut rng);
            assert!(d >= t.min && d <= t.max, "{d:?}");
        }
        assert_eq!(
            ThinkTime::fixed(Duration::from_secs(1)).sample(&mut rng),
            Duration::from_secs(1)
        );
    }
}

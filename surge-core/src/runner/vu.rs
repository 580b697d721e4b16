use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use surge_metrics::{Registry, Sample, SampleValue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::ThinkTime;
use super::metrics::EngineMetrics;

/// What a scenario iteration sees: its identity, the target and a write-only
/// sample sink.
#[derive(Debug, Clone)]
pub struct IterationContext {
    vu_id: u64,
    iteration: u64,
    base_url: Arc<str>,
    registry: Arc<Registry>,
    retire: CancellationToken,
}

impl IterationContext {
    pub(crate) fn new(
        vu_id: u64,
        iteration: u64,
        base_url: Arc<str>,
        registry: Arc<Registry>,
        retire: CancellationToken,
    ) -> Self {
        Self {
            vu_id,
            iteration,
            base_url,
            registry,
            retire,
        }
    }

    /// 1-based id, unique for the run.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 1-based iteration number of this virtual user.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submits one observation to the metric named `metric`.
    pub fn record(
        &self,
        metric: &str,
        value: impl Into<SampleValue>,
    ) -> surge_metrics::Result<()> {
        self.registry.record(&Sample::new(metric, value.into()))
    }

    /// Adds `n` to a counter.
    pub fn add(&self, metric: &str, n: u64) -> surge_metrics::Result<()> {
        self.record(metric, SampleValue::Count(n))
    }

    /// True once this virtual user is retired or the run is ending.
    pub fn is_cancelled(&self) -> bool {
        self.retire.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.retire.cancelled().await;
    }
}

/// Returned by a successful iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationOutcome {
    /// Pause before the next iteration. Overrides the profile's think time.
    pub think_time: Option<Duration>,
}

impl IterationOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn think(d: Duration) -> Self {
        Self {
            think_time: Some(d),
        }
    }
}

pub(crate) struct VuShared<F> {
    pub(crate) scenario: F,
    pub(crate) registry: Arc<Registry>,
    pub(crate) metrics: EngineMetrics,
    pub(crate) base_url: Arc<str>,
    pub(crate) think_time: Option<ThinkTime>,
}

/// Iteration loop of one virtual user. Returns once `retire` is cancelled,
/// checked only between iterations.
pub(crate) async fn run_vu<F, Fut, E>(
    vu_id: u64,
    shared: Arc<VuShared<F>>,
    retire: CancellationToken,
) where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IterationOutcome, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut iteration: u64 = 0;

    while !retire.is_cancelled() {
        iteration = iteration.saturating_add(1);
        let ctx = IterationContext::new(
            vu_id,
            iteration,
            shared.base_url.clone(),
            shared.registry.clone(),
            retire.clone(),
        );

        let started = Instant::now();
        let res = AssertUnwindSafe(async { (shared.scenario)(ctx).await })
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let (failed, requested_think) = match res {
            Ok(Ok(outcome)) => (false, outcome.think_time),
            Ok(Err(err)) => {
                tracing::debug!(vu_id, iteration, error = %err, "iteration failed");
                (true, None)
            }
            Err(panic) => {
                tracing::warn!(
                    vu_id,
                    iteration,
                    panic = %panic_message(panic.as_ref()),
                    "scenario panicked"
                );
                (true, None)
            }
        };

        shared.metrics.iterations.increment(1);
        shared
            .metrics
            .iteration_duration
            .observe(elapsed.as_secs_f64() * 1000.0);
        shared.metrics.iteration_failed.add_rate(failed);

        let think = requested_think
            .or_else(|| shared.think_time.map(|t| t.sample(&mut rand::rng())))
            .filter(|d| !d.is_zero());
        if let Some(d) = think {
            tokio::select! {
                _ = tokio::time::sleep(d) => {}
                _ = retire.cancelled() => break,
            }
        }
    }

    tracing::trace!(vu_id, iterations = iteration, "virtual user stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::metrics;
    use surge_metrics::{MetricKind, MetricValue};

    fn shared<F>(scenario: F, think_time: Option<ThinkTime>) -> Arc<VuShared<F>> {
        let registry = Arc::new(Registry::new());
        metrics::register_all(
            &registry,
            &[crate::MetricDecl {
                name: "errors".to_string(),
                kind: MetricKind::Rate,
            }],
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let engine = EngineMetrics::new(&registry).unwrap_or_else(|e| panic!("{e}"));
        Arc::new(VuShared {
            scenario,
            registry,
            metrics: engine,
            base_url: Arc::from("http://test"),
            think_time,
        })
    }

    fn counter(registry: &Registry, name: &str) -> u64 {
        match registry.snapshot(name).map(|s| s.value) {
            Some(MetricValue::Counter(v)) => v,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_and_panics_are_recorded_and_loop_continues() {
        let s = shared(
            |ctx: IterationContext| async move {
                match ctx.iteration() % 3 {
                    0 => panic!("boom"),
                    1 => Err("nope".to_string()),
                    _ => {
                        ctx.record("errors", false).map_err(|e| e.to_string())?;
                        Ok(IterationOutcome::think(Duration::from_millis(100)))
                    }
                }
            },
            None,
        );

        let retire = CancellationToken::new();
        let task = tokio::spawn(run_vu(1, s.clone(), retire.clone()));

        // Iterations 1 and 3 take no time; iteration 2 thinks 100ms. 3 cycles in ~300ms.
        tokio::time::sleep(Duration::from_millis(250)).await;
        retire.cancel();
        task.await.unwrap_or_else(|e| panic!("{e}"));

        let iterations = counter(&s.registry, metrics::names::ITERATIONS);
        assert!(iterations >= 6, "{iterations}");
        let Some(MetricValue::Rate(failed)) = s
            .registry
            .snapshot(metrics::names::ITERATION_FAILED)
            .map(|s| s.value)
        else {
            panic!("missing iteration_failed");
        };
        assert_eq!(failed.total, iterations);
        assert!(failed.hits >= 4, "{failed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn retirement_waits_for_the_current_iteration() {
        let s = shared(
            |_ctx: IterationContext| async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, std::convert::Infallible>(IterationOutcome::done())
            },
            None,
        );

        let retire = CancellationToken::new();
        let task = tokio::spawn(run_vu(7, s.clone(), retire.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let cancelled_at = Instant::now();
        retire.cancel();
        task.await.unwrap_or_else(|e| panic!("{e}"));

        // The in-flight iteration ran to completion.
        assert!(cancelled_at.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(counter(&s.registry, metrics::names::ITERATIONS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn profile_think_time_applies_and_is_interrupted_by_retirement() {
        let s = shared(
            |_ctx: IterationContext| async move {
                Ok::<_, std::convert::Infallible>(IterationOutcome::done())
            },
            Some(ThinkTime::fixed(Duration::from_secs(10))),
        );

        let retire = CancellationToken::new();
        let task = tokio::spawn(run_vu(1, s.clone(), retire.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let cancelled_at = Instant::now();
        retire.cancel();
        task.await.unwrap_or_else(|e| panic!("{e}"));

        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert_eq!(counter(&s.registry, metrics::names::ITERATIONS), 1);
    }

    #[test]
    fn context_rejects_unknown_metrics() {
        let registry = Arc::new(Registry::new());
        let ctx = IterationContext::new(
            1,
            1,
            Arc::from("http://x"),
            registry,
            CancellationToken::new(),
        );
        assert!(ctx.add("missing", 1).is_err());
        assert_eq!(ctx.base_url(), "http://x");
        assert!(!ctx.is_cancelled());
    }
}

use std::sync::{Arc, OnceLock};

use surge_metrics::{MetricValue, Registry};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::config::RunProfile;
use super::error::Result;
use super::metrics::{self, EngineMetrics, names};
use super::pool::VuPool;
use super::progress::{ProgressFn, ProgressUpdate};
use super::stats::RunResult;
use super::thresholds::{evaluate_one, evaluate_thresholds};
use super::vu::{IterationContext, IterationOutcome, VuShared};

/// External handle on a run: abort signal and optional progress callback.
#[derive(Clone, Default)]
pub struct RunControl {
    abort: CancellationToken,
    reason: Arc<OnceLock<String>>,
    progress: Option<ProgressFn>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stops scheduling new iterations. The run still returns a result built
    /// from what was collected. Only the first reason is kept.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    fn abort_reason(&self) -> Option<String> {
        if !self.is_aborted() {
            return None;
        }
        Some(
            self.reason
                .get()
                .cloned()
                .unwrap_or_else(|| "aborted".to_string()),
        )
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason.get())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Drives `scenario` through the profile's stages and returns the final result.
///
/// Every virtual user has finished its last iteration before metrics are
/// frozen and thresholds evaluated.
pub async fn run<F, Fut, E>(
    profile: &RunProfile,
    scenario: F,
    control: RunControl,
) -> Result<RunResult>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<IterationOutcome, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let registry = Arc::new(Registry::new());
    metrics::register_all(&registry, profile.metrics())?;
    let engine = EngineMetrics::new(&registry)?;

    let schedule = profile.schedule();
    let total = schedule.total_duration();
    tracing::info!(
        stages = schedule.stages().len(),
        total_duration = ?total,
        peak_vus = schedule.peak_target(),
        "starting run"
    );

    let stop = CancellationToken::new();
    let mut pool = VuPool::new(
        Arc::new(VuShared {
            scenario,
            registry: registry.clone(),
            metrics: engine.clone(),
            base_url: profile.base_url().clone(),
            think_time: profile.think_time(),
        }),
        stop,
    );

    let started = Instant::now();
    let deadline = tokio::time::sleep_until(started + total);
    tokio::pin!(deadline);

    let mut interval = tokio::time::interval(profile.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tick: u64 = 0;
    let mut stage_index = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut deadline => break,
            _ = control.abort.cancelled() => break,
        }

        let elapsed = started.elapsed();
        if schedule.is_done(elapsed) {
            break;
        }

        let stage = schedule.stage_snapshot_at(elapsed);
        if stage_index != Some(stage.index) {
            stage_index = Some(stage.index);
            tracing::debug!(
                stage = stage.index + 1,
                stages = stage.count,
                from = stage.start_target,
                to = stage.end_target,
                "entering stage"
            );
        }

        let target = stage.current_target;
        pool.reconcile(target);
        engine.set_live(pool.live());

        tick = tick.saturating_add(1);
        if let Some(progress) = &control.progress {
            let (iterations_total, iterations_failed_total) = iteration_totals(&registry);
            (progress)(ProgressUpdate {
                tick,
                elapsed,
                total_duration: total,
                stage: stage.into(),
                live_vus: pool.live() as u64,
                target_vus: target,
                iterations_total,
                iterations_failed_total,
            });
        }

        if let Some(reason) = crossed_abort_threshold(profile, &registry) {
            tracing::warn!(%reason, "aborting run");
            control.abort(reason);
            break;
        }
    }

    if let Some(reason) = control.abort_reason() {
        tracing::info!(%reason, "run aborted, waiting for in-flight iterations");
    }

    tracing::debug!(
        live = pool.live(),
        draining = pool.draining(),
        "waiting for virtual users to finish"
    );
    pool.shutdown().await;
    let duration = started.elapsed();

    let snapshots = registry.summarize();
    let outcomes = evaluate_thresholds(&snapshots, profile.thresholds());
    let result = RunResult::new(snapshots, outcomes, duration, control.abort_reason());

    tracing::info!(
        passed = result.passed,
        aborted = result.aborted,
        duration = ?result.duration,
        "run finished"
    );
    Ok(result)
}

fn iteration_totals(registry: &Registry) -> (u64, u64) {
    let iterations = match registry.snapshot(names::ITERATIONS).map(|s| s.value) {
        Some(MetricValue::Counter(v)) => v,
        _ => 0,
    };
    let failed = match registry
        .snapshot(names::ITERATION_FAILED)
        .map(|s| s.value)
    {
        Some(MetricValue::Rate(r)) => r.hits,
        _ => 0,
    };
    (iterations, failed)
}

// Abort-on-fail thresholds are only judged once their metric has data.
fn crossed_abort_threshold(profile: &RunProfile, registry: &Registry) -> Option<String> {
    for set in profile.thresholds() {
        if !set.thresholds.iter().any(|t| t.abort_on_fail) {
            continue;
        }
        let Some(snapshot) = registry.snapshot(&set.metric) else {
            continue;
        };
        if snapshot.value.sample_count() == 0 {
            continue;
        }
        for t in set.thresholds.iter().filter(|t| t.abort_on_fail) {
            let outcome = evaluate_one(&set.metric, Some(&snapshot), t);
            if !outcome.passed {
                return Some(format!(
                    "threshold `{}` on `{}` crossed",
                    t.source, set.metric
                ));
            }
        }
    }
    None
}

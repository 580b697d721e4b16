use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use surge_core::{Assessment, ProgressFn, ProgressUpdate, RunProfile, RunResult};

mod format;
mod progress;

use format::{format_duration, format_rate};
use progress::HumanProgress;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, profile_path: &Path, profile: &RunProfile) {
        println!("profile: {}", profile_path.display());
        println!("target: {}", profile.base_url());
        for (i, s) in profile.stages().iter().enumerate() {
            println!(
                "stage {}: {} -> {} vus",
                i + 1,
                format_duration(s.duration),
                s.target
            );
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        // (elapsed, iterations) at the previous tick
        let prev: Arc<Mutex<(Duration, u64)>> = Arc::new(Mutex::new((Duration::ZERO, 0)));

        Some(Arc::new(move |u: ProgressUpdate| {
            let iters_per_sec = {
                let mut prev = prev
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let dt = u.elapsed.saturating_sub(prev.0).as_secs_f64().max(1e-9);
                let delta = u.iterations_total.saturating_sub(prev.1);
                *prev = (u.elapsed, u.iterations_total);
                (delta as f64) / dt
            };

            let message = progress_message(&u, iters_per_sec);
            progress.update(u.total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, result: &RunResult, assessment: &Assessment) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", surge_core::render_summary(result, assessment));

        let failed: Vec<_> = result.failed_thresholds().collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for t in failed {
                match (t.observed, &t.reason) {
                    (_, Some(reason)) => eprintln!("  {}: {} ({reason})", t.metric, t.expression),
                    (Some(obs), None) => {
                        eprintln!("  {}: {} (observed {obs})", t.metric, t.expression)
                    }
                    (None, None) => eprintln!("  {}: {}", t.metric, t.expression),
                }
            }
        }

        Ok(())
    }
}

fn progress_message(u: &ProgressUpdate, iters_per_sec: f64) -> String {
    format!(
        "stage={}/{} target={} vus={} iters/s={} failed={}/{} elapsed={} stage_remaining={}",
        u.stage.stage,
        u.stage.stages,
        u.target_vus,
        u.live_vus,
        format_rate(iters_per_sec),
        u.iterations_failed_total,
        u.iterations_total,
        format_duration(u.elapsed),
        format_duration(u.stage.stage_remaining),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_core::StageProgress;

    #[test]
    fn progress_message_shows_stage_and_population() {
        let u = ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_secs(12),
            total_duration: Duration::from_secs(60),
            stage: StageProgress {
                stage: 2,
                stages: 3,
                stage_elapsed: Duration::from_secs(2),
                stage_remaining: Duration::from_secs(18),
                start_target: 20,
                end_target: 100,
                current_target: 28,
            },
            live_vus: 27,
            target_vus: 28,
            iterations_total: 400,
            iterations_failed_total: 4,
        };

        assert_eq!(
            progress_message(&u, 35.2),
            "stage=2/3 target=28 vus=27 iters/s=35 failed=4/400 elapsed=12s stage_remaining=18s"
        );
    }
}

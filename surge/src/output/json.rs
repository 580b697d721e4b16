use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use surge_core::{Assessment, ProgressFn, ProgressUpdate, RunProfile, RunResult};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _profile_path: &Path, _profile: &RunProfile) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, result: &RunResult, assessment: &Assessment) -> anyhow::Result<()> {
        let line = build_summary_line(result, assessment);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_secs: f64,
    pub stage: usize,
    pub stages: usize,
    pub stage_remaining_secs: f64,
    pub target_vus: u64,
    pub live_vus: u64,
    pub iterations_total: u64,
    pub iterations_failed_total: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_secs: u.total_duration.as_secs_f64(),
        stage: u.stage.stage,
        stages: u.stage.stages,
        stage_remaining_secs: u.stage.stage_remaining.as_secs_f64(),
        target_vus: u.target_vus,
        live_vus: u.live_vus,
        iterations_total: u.iterations_total,
        iterations_failed_total: u.iterations_failed_total,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    #[serde(flatten)]
    pub result: &'a RunResult,
    /// Assessment tier, absent when its inputs were never recorded.
    pub assessment: Option<&'a str>,
}

fn build_summary_line<'a>(
    result: &'a RunResult,
    assessment: &'a Assessment,
) -> JsonSummaryLine<'a> {
    JsonSummaryLine {
        kind: "summary",
        result,
        assessment: assessment.classify(result),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;
    use surge_core::{RunControl, StageProgress};

    #[test]
    fn progress_line_has_kind() {
        let u = ProgressUpdate {
            tick: 1,
            elapsed: Duration::from_millis(1500),
            total_duration: Duration::from_secs(10),
            stage: StageProgress {
                stage: 1,
                stages: 2,
                stage_elapsed: Duration::from_millis(1500),
                stage_remaining: Duration::from_millis(3500),
                start_target: 0,
                end_target: 10,
                current_target: 3,
            },
            live_vus: 3,
            target_vus: 3,
            iterations_total: 9,
            iterations_failed_total: 1,
        };

        let v = serde_json::to_value(build_progress_line(&u)).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(v["kind"], Value::from("progress"));
        assert_eq!(v["elapsed_secs"], Value::from(1.5));
        assert_eq!(v["stage"], Value::from(1));
        assert_eq!(v["live_vus"], Value::from(3));
        assert_eq!(v["iterations_failed_total"], Value::from(1));
    }

    #[tokio::test(start_paused = true)]
    async fn summary_line_flattens_result() {
        let profile = RunProfile::builder()
            .stage(Duration::from_secs(1), 0)
            .threshold("http_req_failed", "rate<0.1")
            .build()
            .unwrap_or_else(|e| panic!("{e}"));
        let result = surge_core::run(
            &profile,
            |_ctx| async {
                Ok::<_, std::convert::Infallible>(surge_core::IterationOutcome::done())
            },
            RunControl::new(),
        )
        .await
        .unwrap_or_else(|e| panic!("{e}"));

        let line = build_summary_line(&result, profile.assessment());
        let v = serde_json::to_value(&line).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(v["kind"], Value::from("summary"));
        assert_eq!(v["passed"], Value::from(true));
        assert!(v["assessment"].is_null());
        assert!(v["metrics"].as_array().is_some_and(|m| !m.is_empty()));
        assert!(v["thresholds"].as_array().is_some_and(|t| t.len() == 1));
    }
}

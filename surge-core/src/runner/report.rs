use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;
use surge_metrics::{MetricValue, TrendSummary};

use super::error::{Error, Result};
use super::metrics::names;
use super::stats::RunResult;

/// One qualitative tier: matches when both the error rate and the average
/// latency are strictly below the bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierRule {
    pub label: String,
    pub max_error_rate: f64,
    pub max_avg_latency_ms: f64,
}

impl TierRule {
    pub fn new(label: impl Into<String>, max_error_rate: f64, max_avg_latency_ms: f64) -> Self {
        Self {
            label: label.into(),
            max_error_rate,
            max_avg_latency_ms,
        }
    }

    fn matches(&self, error_rate: f64, avg_latency_ms: f64) -> bool {
        error_rate < self.max_error_rate && avg_latency_ms < self.max_avg_latency_ms
    }
}

/// Ordered tier rules; the first match wins, `fallback` applies otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub rules: Vec<TierRule>,
    pub fallback: String,
    /// Rate metric holding the error ratio.
    pub error_metric: String,
    /// Trend metric whose average is the latency, in milliseconds.
    pub latency_metric: String,
}

impl Default for Assessment {
    fn default() -> Self {
        Self {
            rules: vec![
                TierRule::new("excellent", 0.05, 1_000.0),
                TierRule::new("degraded", 0.15, 3_000.0),
            ],
            fallback: "failing".to_string(),
            error_metric: names::HTTP_REQ_FAILED.to_string(),
            latency_metric: names::HTTP_REQ_DURATION.to_string(),
        }
    }
}

impl Assessment {
    pub(crate) fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            let ok = rule.max_error_rate.is_finite()
                && rule.max_avg_latency_ms.is_finite()
                && rule.max_error_rate >= 0.0
                && rule.max_avg_latency_ms >= 0.0;
            if !ok {
                return Err(Error::InvalidTierRule(rule.label.clone()));
            }
        }
        Ok(())
    }

    /// Tier label for `result`, or `None` when the inputs were never recorded.
    pub fn classify(&self, result: &RunResult) -> Option<&str> {
        let (error_rate, avg_ms) = self.inputs(result)?;
        let label = self
            .rules
            .iter()
            .find(|r| r.matches(error_rate, avg_ms))
            .map_or(self.fallback.as_str(), |r| r.label.as_str());
        Some(label)
    }

    fn inputs(&self, result: &RunResult) -> Option<(f64, f64)> {
        let error_rate = match result.metric(&self.error_metric)? {
            MetricValue::Rate(r) => r.rate_or_zero(),
            _ => return None,
        };
        let avg_ms = match result.metric(&self.latency_metric)? {
            MetricValue::Trend(t) => t.avg()?,
            _ => return None,
        };
        Some((error_rate, avg_ms))
    }
}

/// Human-readable run report. Pure: the same inputs always give the same text.
pub fn render_summary(result: &RunResult, assessment: &Assessment) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(out, "  duration: {:.2}s", result.duration.as_secs_f64()).ok();
    match &result.abort_reason {
        Some(reason) => writeln!(out, "  status: aborted ({reason})").ok(),
        None => writeln!(out, "  status: completed").ok(),
    };

    out.push_str("\nmetrics\n");
    let width = result
        .metrics
        .iter()
        .map(|m| m.name.len())
        .max()
        .unwrap_or(0)
        + 3;
    for m in &result.metrics {
        writeln!(
            out,
            "  {:.<width$}: {}",
            format!("{} ", m.name),
            format_value(&m.name, &m.value, result.duration)
        )
        .ok();
    }

    if !result.thresholds.is_empty() {
        out.push_str("\nthresholds\n");
        for t in &result.thresholds {
            let mark = if t.passed { '✓' } else { '✗' };
            let detail = match (t.observed, &t.reason) {
                (Some(v), _) => format!("observed {}", format_number(v)),
                (None, Some(reason)) => reason.clone(),
                (None, None) => "no value".to_string(),
            };
            writeln!(out, "  {mark} {} {} ({detail})", t.metric, t.expression).ok();
        }
    }

    out.push('\n');
    writeln!(
        out,
        "verdict: {}",
        if result.passed { "PASSED" } else { "FAILED" }
    )
    .ok();

    match assessment.inputs(result) {
        Some((error_rate, avg_ms)) => {
            let tier = assessment.classify(result).unwrap_or("n/a");
            let peak = match result.metric(names::VUS_MAX) {
                Some(MetricValue::Gauge(v)) => v.to_string(),
                _ => "n/a".to_string(),
            };
            writeln!(
                out,
                "assessment: {tier} (avg {}ms, error rate {:.2}%, peak vus {peak})",
                format_number(avg_ms),
                error_rate * 100.0
            )
            .ok();
        }
        None => {
            out.push_str("assessment: n/a (no data)\n");
        }
    }

    out
}

fn format_value(name: &str, value: &MetricValue, elapsed: Duration) -> String {
    match value {
        MetricValue::Counter(c) => format_counter(*c, elapsed),
        MetricValue::Gauge(g) => g.to_string(),
        MetricValue::Rate(r) => match r.rate {
            Some(rate) => format!("{:.2}% ({}/{})", rate * 100.0, r.hits, r.total),
            None => "n/a (0 samples)".to_string(),
        },
        MetricValue::Trend(t) => format_trend(name, t),
    }
}

/// Count plus its average rate over the run; the rate is left out for an
/// empty run.
fn format_counter(count: u64, elapsed: Duration) -> String {
    if elapsed.is_zero() {
        return count.to_string();
    }
    let per_sec = count as f64 / elapsed.as_secs_f64();
    format!("{count} ({}/s)", format_number(per_sec))
}

fn format_trend(name: &str, t: &TrendSummary) -> String {
    if t.is_empty() {
        return "n/a (0 samples)".to_string();
    }
    let unit = if name.ends_with("duration") { "ms" } else { "" };
    let f = |v: Option<f64>| match v {
        Some(v) => format!("{}{unit}", format_number(v)),
        None => "n/a".to_string(),
    };
    format!(
        "avg={} p(95)={} p(99)={} max={} (n={})",
        f(t.avg()),
        f(t.percentile(95.0)),
        f(t.percentile(99.0)),
        f(t.max()),
        t.count()
    )
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

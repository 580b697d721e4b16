use std::fmt;

use serde::Serialize;
use surge_metrics::{MetricKind, MetricSnapshot, MetricValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
}

impl ThresholdOp {
    fn compare(self, observed: f64, expected: f64) -> bool {
        match self {
            ThresholdOp::Lt => observed < expected,
            ThresholdOp::Lte => observed <= expected,
            ThresholdOp::Gt => observed > expected,
            ThresholdOp::Gte => observed >= expected,
            ThresholdOp::Eq => observed == expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ThresholdStat {
    Avg,
    Min,
    Max,
    Count,
    Rate,
    Value,
    P(f64),
}

impl ThresholdStat {
    pub fn applies_to(self, kind: MetricKind) -> bool {
        match self {
            ThresholdStat::Count => !matches!(kind, MetricKind::Gauge),
            ThresholdStat::Rate => matches!(kind, MetricKind::Rate),
            ThresholdStat::Value => matches!(kind, MetricKind::Gauge),
            ThresholdStat::Avg | ThresholdStat::Min | ThresholdStat::Max => {
                matches!(kind, MetricKind::Trend | MetricKind::Gauge)
            }
            ThresholdStat::P(_) => matches!(kind, MetricKind::Trend),
        }
    }
}

impl fmt::Display for ThresholdStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdStat::Avg => f.write_str("avg"),
            ThresholdStat::Min => f.write_str("min"),
            ThresholdStat::Max => f.write_str("max"),
            ThresholdStat::Count => f.write_str("count"),
            ThresholdStat::Rate => f.write_str("rate"),
            ThresholdStat::Value => f.write_str("value"),
            ThresholdStat::P(p) => write!(f, "p({p})"),
        }
    }
}

/// `<stat><op><number>`, parsed once when the profile is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdExpr {
    pub stat: ThresholdStat,
    pub op: ThresholdOp,
    pub value: f64,
}

impl ThresholdExpr {
    pub fn is_met(&self, observed: f64) -> bool {
        self.op.compare(observed, self.value)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.stat, self.op, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    /// Expression as the user wrote it.
    pub source: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSet {
    pub metric: String,
    pub thresholds: Vec<Threshold>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    /// Why the threshold could not be evaluated, if it could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| "missing comparison operator".to_string())?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() {
        return Err("missing statistic".to_string());
    }
    if right.is_empty() {
        return Err("missing numeric value".to_string());
    }

    let stat = if left.eq_ignore_ascii_case("avg") {
        ThresholdStat::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdStat::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdStat::Max
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdStat::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdStat::Rate
    } else if left.eq_ignore_ascii_case("value") {
        ThresholdStat::Value
    } else if let Some(inner) = left
        .strip_prefix("p(")
        .or_else(|| left.strip_prefix("P("))
        .and_then(|v| v.strip_suffix(')'))
    {
        let p: f64 = inner
            .parse()
            .map_err(|_| format!("invalid percentile `{inner}`"))?;
        if !(0.0..=100.0).contains(&p) {
            return Err(format!("percentile {p} out of range [0, 100]"));
        }
        ThresholdStat::P(p)
    } else {
        return Err(format!("unknown statistic `{left}`"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value `{right}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value `{right}`"));
    }

    Ok(ThresholdExpr { stat, op, value })
}

/// Evaluates every declared threshold against `snapshots`.
///
/// Missing metrics and trend statistics without samples fail closed. A rate
/// without observations is evaluated as 0.
pub fn evaluate_thresholds(
    snapshots: &[MetricSnapshot],
    sets: &[ThresholdSet],
) -> Vec<ThresholdOutcome> {
    let mut out = Vec::new();

    for set in sets {
        let snapshot = snapshots.iter().find(|s| s.name == set.metric);
        for t in &set.thresholds {
            out.push(evaluate_one(&set.metric, snapshot, t));
        }
    }

    out
}

pub(crate) fn evaluate_one(
    metric: &str,
    snapshot: Option<&MetricSnapshot>,
    threshold: &Threshold,
) -> ThresholdOutcome {
    let (observed, reason) = match snapshot {
        None => (None, Some(format!("metric `{metric}` is not registered"))),
        Some(s) => match observed_value(&s.value, threshold.expr.stat) {
            Some(v) => (Some(v), None),
            None if s.value.sample_count() == 0 => (None, Some("no samples recorded".to_string())),
            None => (
                None,
                Some(format!(
                    "`{}` is not defined for {} metrics",
                    threshold.expr.stat, s.kind
                )),
            ),
        },
    };

    ThresholdOutcome {
        metric: metric.to_string(),
        expression: threshold.source.clone(),
        observed,
        passed: observed.is_some_and(|v| threshold.expr.is_met(v)),
        reason,
    }
}

fn observed_value(value: &MetricValue, stat: ThresholdStat) -> Option<f64> {
    match (value, stat) {
        (MetricValue::Counter(c), ThresholdStat::Count) => Some(*c as f64),

        (MetricValue::Gauge(g), ThresholdStat::Value)
        | (MetricValue::Gauge(g), ThresholdStat::Avg)
        | (MetricValue::Gauge(g), ThresholdStat::Min)
        | (MetricValue::Gauge(g), ThresholdStat::Max) => Some(*g as f64),

        (MetricValue::Rate(r), ThresholdStat::Rate) => Some(r.rate_or_zero()),
        (MetricValue::Rate(r), ThresholdStat::Count) => Some(r.total as f64),

        (MetricValue::Trend(t), ThresholdStat::Count) => Some(t.count() as f64),
        (MetricValue::Trend(t), ThresholdStat::Avg) => t.avg(),
        (MetricValue::Trend(t), ThresholdStat::Min) => t.min(),
        (MetricValue::Trend(t), ThresholdStat::Max) => t.max(),
        (MetricValue::Trend(t), ThresholdStat::P(p)) => t.percentile(p),

        _ => None,
    }
}

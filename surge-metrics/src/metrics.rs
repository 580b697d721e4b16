use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub value: MetricValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate(RateSummary),
    Trend(TrendSummary),
}

impl MetricValue {
    /// Number of observations behind this value.
    ///
    /// Gauges have no sample count; they report 1 once set to a non-zero value.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        match self {
            Self::Counter(v) => *v,
            Self::Gauge(v) => u64::from(*v != 0),
            Self::Rate(r) => r.total,
            Self::Trend(t) => t.count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateSummary {
    pub total: u64,
    pub hits: u64,
    /// `None` when no observation was recorded.
    pub rate: Option<f64>,
}

impl RateSummary {
    #[must_use]
    pub fn new(total: u64, hits: u64) -> Self {
        let rate = (total > 0).then(|| hits as f64 / total as f64);
        Self { total, hits, rate }
    }

    /// Zero-state default used by thresholds and reports.
    #[must_use]
    pub fn rate_or_zero(&self) -> f64 {
        self.rate.unwrap_or(0.0)
    }
}

/// Distribution of trend samples, sorted ascending.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(into = "TrendStats")]
pub struct TrendSummary {
    sorted: Arc<[f64]>,
}

impl TrendSummary {
    #[must_use]
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.sort_by(f64::total_cmp);
        Self {
            sorted: Arc::from(samples.into_boxed_slice()),
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.sorted.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.sorted.first().copied()
    }

    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }

    #[must_use]
    pub fn avg(&self) -> Option<f64> {
        if self.sorted.is_empty() {
            return None;
        }
        let sum: f64 = self.sorted.iter().sum();
        Some(sum / self.sorted.len() as f64)
    }

    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        percentile(&self.sorted, p)
    }

    #[must_use]
    pub fn samples(&self) -> &[f64] {
        &self.sorted
    }
}

/// Percentile of an ascending slice by linear interpolation between closest ranks.
///
/// `rank = p / 100 * (n - 1)`; the result is `s[lo] + (s[hi] - s[lo]) * (rank - lo)`
/// with `lo = floor(rank)` and `hi = ceil(rank)`. `p` is clamped to `[0, 100]`.
/// Returns `None` for an empty slice.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 || p.is_nan() {
        return None;
    }
    if n == 1 {
        return Some(sorted[0]);
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let lo_v = sorted[lo];
    let hi_v = sorted[hi.min(n - 1)];
    Some(lo_v + (hi_v - lo_v) * (rank - lo as f64))
}

#[derive(Debug, Serialize)]
struct TrendStats {
    count: u64,
    avg: Option<f64>,
    min: Option<f64>,
    med: Option<f64>,
    max: Option<f64>,
    #[serde(rename = "p(90)")]
    p90: Option<f64>,
    #[serde(rename = "p(95)")]
    p95: Option<f64>,
    #[serde(rename = "p(99)")]
    p99: Option<f64>,
}

impl From<TrendSummary> for TrendStats {
    fn from(t: TrendSummary) -> Self {
        Self {
            count: t.count(),
            avg: t.avg(),
            min: t.min(),
            med: t.percentile(50.0),
            max: t.max(),
            p90: t.percentile(90.0),
            p95: t.percentile(95.0),
            p99: t.percentile(99.0),
        }
    }
}

#[derive(Debug)]
pub struct Rate {
    pub total: AtomicU64,
    pub hits: AtomicU64,
}

#[derive(Debug, Default)]
pub struct Trend {
    samples: Mutex<Vec<f64>>,
}

impl Trend {
    pub(crate) fn record(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.samples.lock().push(value);
    }

    pub(crate) fn summarize(&self) -> TrendSummary {
        // Copy under the lock, sort outside of it so writers only wait for a memcpy.
        let copy = self.samples.lock().clone();
        TrendSummary::from_samples(copy)
    }
}

#[derive(Debug)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Trend(Arc<Trend>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricStorage::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => MetricStorage::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => MetricStorage::Rate(Arc::new(Rate {
                total: AtomicU64::new(0),
                hits: AtomicU64::new(0),
            })),
            MetricKind::Trend => MetricStorage::Trend(Arc::new(Trend::default())),
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            MetricStorage::Counter(a) => MetricHandle::Counter(a.clone()),
            MetricStorage::Gauge(a) => MetricHandle::Gauge(a.clone()),
            MetricStorage::Rate(a) => MetricHandle::Rate(a.clone()),
            MetricStorage::Trend(a) => MetricHandle::Trend(a.clone()),
        }
    }

    pub(crate) fn value(&self) -> MetricValue {
        match self {
            MetricStorage::Counter(a) => MetricValue::Counter(a.load(Ordering::Relaxed)),
            MetricStorage::Gauge(a) => MetricValue::Gauge(a.load(Ordering::Relaxed)),
            MetricStorage::Rate(r) => {
                // Pairs with the release in `add_rate`: every hit seen here has its
                // total increment visible too.
                let hits = r.hits.load(Ordering::Acquire);
                let total = r.total.load(Ordering::Relaxed);
                MetricValue::Rate(RateSummary::new(total, hits))
            }
            MetricStorage::Trend(t) => MetricValue::Trend(t.summarize()),
        }
    }
}

/// Write-only handle to a registered metric.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Trend(Arc<Trend>),
}

impl MetricHandle {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricHandle::Counter(_) => MetricKind::Counter,
            MetricHandle::Gauge(_) => MetricKind::Gauge,
            MetricHandle::Rate(_) => MetricKind::Rate,
            MetricHandle::Trend(_) => MetricKind::Trend,
        }
    }

    #[inline]
    pub fn increment(&self, value: u64) {
        if let MetricHandle::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_gauge(&self, value: i64) {
        if let MetricHandle::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    /// Raise the gauge to `value` if it is currently lower.
    #[inline]
    pub fn max_gauge(&self, value: i64) {
        if let MetricHandle::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, hit: bool) {
        if let MetricHandle::Rate(r) = self {
            // Total first, so a concurrent reader never sees hits > total.
            r.total.fetch_add(1, Ordering::Relaxed);
            if hit {
                r.hits.fetch_add(1, Ordering::Release);
            }
        }
    }

    #[inline]
    pub fn observe(&self, value: f64) {
        if let MetricHandle::Trend(t) = self {
            t.record(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(values: &[f64]) -> TrendSummary {
        TrendSummary::from_samples(values.to_vec())
    }

    #[test]
    fn trend_stats_for_fixed_sample_set() {
        let t = trend(&[50.0, 10.0, 40.0, 20.0, 30.0]);
        assert_eq!(t.count(), 5);
        assert_eq!(t.avg(), Some(30.0));
        assert_eq!(t.min(), Some(10.0));
        assert_eq!(t.max(), Some(50.0));
        assert_eq!(t.percentile(50.0), Some(30.0));
        assert_eq!(t.percentile(100.0), Some(50.0));
        assert_eq!(t.percentile(0.0), Some(10.0));
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let s = [10.0, 20.0, 30.0, 40.0, 50.0];
        // rank = 0.95 * 4 = 3.8 => 40 + 10 * 0.8
        let p95 = percentile(&s, 95.0).unwrap_or_else(|| panic!("missing p95"));
        assert!((p95 - 48.0).abs() < 1e-9);
        // rank = 0.25 * 4 = 1.0 => exactly s[1]
        assert_eq!(percentile(&s, 25.0), Some(20.0));
    }

    #[test]
    fn percentile_edge_cases() {
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&[7.0], 99.0), Some(7.0));
        assert_eq!(percentile(&[1.0, 2.0], 150.0), Some(2.0));
        assert_eq!(percentile(&[1.0, 2.0], f64::NAN), None);
    }

    #[test]
    fn empty_trend_has_no_stats() {
        let t = TrendSummary::default();
        assert!(t.is_empty());
        assert!(t.avg().is_none());
        assert!(t.min().is_none());
        assert!(t.percentile(95.0).is_none());
    }

    #[test]
    fn rate_summary_distinguishes_no_samples_from_zero() {
        let none = RateSummary::new(0, 0);
        assert_eq!(none.rate, None);
        assert_eq!(none.rate_or_zero(), 0.0);

        let zero = RateSummary::new(4, 0);
        assert_eq!(zero.rate, Some(0.0));

        let seven_tenths = RateSummary::new(10, 7);
        assert_eq!(seven_tenths.rate, Some(0.7));
    }

    #[test]
    fn trend_ignores_non_finite_values() {
        let storage = MetricStorage::new(MetricKind::Trend);
        let h = storage.handle();
        h.observe(f64::NAN);
        h.observe(f64::INFINITY);
        h.observe(0.0);
        h.observe(2.0);

        let MetricValue::Trend(t) = storage.value() else {
            panic!("expected trend value");
        };
        assert_eq!(t.count(), 2);
        assert_eq!(t.avg(), Some(1.0));
    }

    #[test]
    fn handles_ignore_mismatched_operations() {
        let storage = MetricStorage::new(MetricKind::Counter);
        let h = storage.handle();
        h.increment(2);
        h.add_rate(true);
        h.observe(1.0);
        h.set_gauge(9);
        h.increment(3);
        assert!(matches!(storage.value(), MetricValue::Counter(5)));
    }

    #[test]
    fn gauge_max_keeps_peak() {
        let storage = MetricStorage::new(MetricKind::Gauge);
        let h = storage.handle();
        h.max_gauge(4);
        h.max_gauge(2);
        h.max_gauge(6);
        assert!(matches!(storage.value(), MetricValue::Gauge(6)));
    }

    #[test]
    fn trend_serializes_computed_stats() {
        let value = MetricValue::Trend(trend(&[10.0, 20.0, 30.0, 40.0, 50.0]));
        let json = serde_json::to_value(&value).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(json["count"], 5);
        assert_eq!(json["avg"], 30.0);
        assert_eq!(json["med"], 30.0);
        assert_eq!(json["max"], 50.0);
        assert!(json.get("p(95)").is_some());
    }

    #[test]
    fn metric_kind_parses_case_insensitively() {
        assert_eq!("rate".parse::<MetricKind>(), Ok(MetricKind::Rate));
        assert_eq!("Trend".parse::<MetricKind>(), Ok(MetricKind::Trend));
        assert!("histogram".parse::<MetricKind>().is_err());
        assert_eq!(MetricKind::Counter.to_string(), "counter");
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::metrics::{MetricHandle, MetricKind, MetricSnapshot, MetricStorage};
use crate::sample::{Sample, SampleValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: Arc<str>,
    kind: MetricKind,
    storage: MetricStorage,
}

/// Named metrics with a kind fixed at registration.
///
/// Writers go through cloned [`MetricHandle`]s (atomics or a short mutex), so
/// a snapshot never blocks them for longer than a buffer copy.
#[derive(Debug, Default)]
pub struct Registry {
    defs: RwLock<Vec<MetricDef>>,
    by_name: DashMap<Arc<str>, MetricId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as `kind`. Registering an existing name with the same
    /// kind returns the existing id.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let mut defs = self.defs.write();
        if let Some(id) = self.by_name.get(name).map(|e| *e.value()) {
            let existing = defs[id.0 as usize].kind;
            if existing != kind {
                return Err(Error::KindConflict {
                    name: name.to_string(),
                    existing,
                    requested: kind,
                });
            }
            return Ok(id);
        }

        let id = MetricId(defs.len() as u32);
        let name: Arc<str> = Arc::from(name);
        defs.push(MetricDef {
            name: name.clone(),
            kind,
            storage: MetricStorage::new(kind),
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<MetricId> {
        self.by_name.get(name).map(|e| *e.value())
    }

    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        let id = self.lookup(name)?;
        self.defs.read().get(id.0 as usize).map(|d| d.kind)
    }

    pub fn handle(&self, name: &str) -> Option<MetricHandle> {
        let id = self.lookup(name)?;
        self.handle_by_id(id)
    }

    pub fn handle_by_id(&self, id: MetricId) -> Option<MetricHandle> {
        self.defs
            .read()
            .get(id.0 as usize)
            .map(|d| d.storage.handle())
    }

    /// Routes a sample to the metric of the same name.
    pub fn record(&self, sample: &Sample) -> Result<()> {
        let handle = self
            .handle(&sample.metric)
            .ok_or_else(|| Error::UnknownMetric(sample.metric.to_string()))?;
        apply(&handle, &sample.metric, sample.value)
    }

    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        let id = self.lookup(name)?;
        let defs = self.defs.read();
        let def = defs.get(id.0 as usize)?;
        Some(snapshot_of(def))
    }

    /// Snapshots of every registered metric, sorted by name.
    pub fn summarize(&self) -> Vec<MetricSnapshot> {
        let defs = self.defs.read();
        let mut out: Vec<MetricSnapshot> = defs.iter().map(snapshot_of).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.defs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn snapshot_of(def: &MetricDef) -> MetricSnapshot {
    MetricSnapshot {
        name: def.name.to_string(),
        kind: def.kind,
        value: def.storage.value(),
    }
}

pub(crate) fn apply(handle: &MetricHandle, name: &str, value: SampleValue) -> Result<()> {
    let kind = handle.kind();
    if value.kind() != kind {
        return Err(Error::SampleKindMismatch {
            name: name.to_string(),
            kind,
            sample: value.kind(),
        });
    }
    match value {
        SampleValue::Count(v) => handle.increment(v),
        SampleValue::Bool(v) => handle.add_rate(v),
        SampleValue::Value(v) => handle.observe(v),
        SampleValue::Gauge(v) => handle.set_gauge(v),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;

    #[test]
    fn register_is_idempotent_for_same_kind() {
        let r = Registry::new();
        let a = r
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        let b = r
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn register_rejects_kind_conflict() {
        let r = Registry::new();
        r.register("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        let err = r.register("errors", MetricKind::Trend).err();
        assert_eq!(
            err,
            Some(Error::KindConflict {
                name: "errors".to_string(),
                existing: MetricKind::Rate,
                requested: MetricKind::Trend,
            })
        );
    }

    #[test]
    fn rate_of_seven_in_ten() {
        let r = Registry::new();
        r.register("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        for i in 0..10 {
            r.record(&Sample::new("errors", SampleValue::Bool(i < 7)))
                .unwrap_or_else(|e| panic!("{e}"));
        }
        let snap = r.snapshot("errors").unwrap_or_else(|| panic!("missing"));
        let MetricValue::Rate(rate) = snap.value else {
            panic!("expected rate");
        };
        assert_eq!(rate.rate, Some(0.7));
        assert_eq!(rate.total, 10);
        assert_eq!(rate.hits, 7);
    }

    #[test]
    fn record_rejects_unknown_metric_and_wrong_kind() {
        let r = Registry::new();
        r.register("total_requests", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            r.record(&Sample::new("nope", SampleValue::Count(1))),
            Err(Error::UnknownMetric("nope".to_string()))
        );
        assert_eq!(
            r.record(&Sample::new("total_requests", SampleValue::Bool(true))),
            Err(Error::SampleKindMismatch {
                name: "total_requests".to_string(),
                kind: MetricKind::Counter,
                sample: MetricKind::Rate,
            })
        );
    }

    #[test]
    fn summarize_is_sorted_by_name() {
        let r = Registry::new();
        for (name, kind) in [
            ("vus", MetricKind::Gauge),
            ("checks", MetricKind::Rate),
            ("iteration_duration", MetricKind::Trend),
        ] {
            r.register(name, kind).unwrap_or_else(|e| panic!("{e}"));
        }
        let names: Vec<String> = r.summarize().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["checks", "iteration_duration", "vus"]);
    }

    #[test]
    fn concurrent_writers_lose_no_updates() {
        let r = Arc::new(Registry::new());
        r.register("n", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        r.register("ok", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        r.register("lat", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let r = r.clone();
                std::thread::spawn(move || {
                    let n = r.handle("n").unwrap_or_else(|| panic!("n"));
                    let ok = r.handle("ok").unwrap_or_else(|| panic!("ok"));
                    for i in 0..1_000 {
                        n.increment(1);
                        ok.add_rate(i % 2 == 0);
                        r.record(&Sample::new("lat", SampleValue::Value(f64::from(t))))
                            .unwrap_or_else(|e| panic!("{e}"));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap_or_else(|_| panic!("writer panicked"));
        }

        let snap = |name: &str| {
            r.snapshot(name)
                .unwrap_or_else(|| panic!("missing {name}"))
                .value
        };
        assert!(matches!(snap("n"), MetricValue::Counter(8_000)));
        let MetricValue::Rate(rate) = snap("ok") else {
            panic!("expected rate");
        };
        assert_eq!((rate.total, rate.hits), (8_000, 4_000));
        let MetricValue::Trend(trend) = snap("lat") else {
            panic!("expected trend");
        };
        assert_eq!(trend.count(), 8_000);
        assert_eq!(trend.max(), Some(7.0));
    }

    #[test]
    fn rate_snapshot_never_exceeds_total_under_writes() {
        let r = Arc::new(Registry::new());
        r.register("ok", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let r = r.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    let ok = r.handle("ok").unwrap_or_else(|| panic!("ok"));
                    while !done.load(std::sync::atomic::Ordering::Relaxed) {
                        ok.add_rate(true);
                    }
                })
            })
            .collect();

        for _ in 0..200_000 {
            let snap = r.snapshot("ok").unwrap_or_else(|| panic!("missing ok"));
            let MetricValue::Rate(rate) = snap.value else {
                panic!("expected rate");
            };
            assert!(rate.hits <= rate.total, "{} > {}", rate.hits, rate.total);
            assert!(rate.rate_or_zero() <= 1.0);
        }

        done.store(true, std::sync::atomic::Ordering::Relaxed);
        for w in writers {
            w.join().unwrap_or_else(|_| panic!("writer panicked"));
        }
    }
}

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::vu::{IterationContext, IterationOutcome, VuShared, run_vu};

#[derive(Debug)]
struct VuHandle {
    id: u64,
    retire: CancellationToken,
    task: JoinHandle<()>,
}

/// Live virtual users, reconciled toward a target count.
///
/// Scale-down retires the most recently started units first. A retired unit
/// finishes its current iteration before its task exits.
pub(crate) struct VuPool<F> {
    shared: Arc<VuShared<F>>,
    stop: CancellationToken,
    live: Vec<VuHandle>,
    draining: Vec<JoinHandle<()>>,
    next_id: u64,
}

impl<F, Fut, E> VuPool<F>
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IterationOutcome, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    pub(crate) fn new(shared: Arc<VuShared<F>>, stop: CancellationToken) -> Self {
        Self {
            shared,
            stop,
            live: Vec::new(),
            draining: Vec::new(),
            next_id: 1,
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.live.len()
    }

    /// Units retired but still finishing their last iteration.
    pub(crate) fn draining(&self) -> usize {
        self.draining.len()
    }

    pub(crate) fn reconcile(&mut self, target: u64) {
        let target = usize::try_from(target).unwrap_or(usize::MAX);
        let live = self.live.len();

        if target > live {
            for _ in live..target {
                self.spawn_one();
            }
            tracing::debug!(from = live, to = target, "scaled up");
        } else if target < live {
            for _ in target..live {
                if let Some(vu) = self.live.pop() {
                    tracing::trace!(vu_id = vu.id, "retiring virtual user");
                    vu.retire.cancel();
                    self.draining.push(vu.task);
                }
            }
            tracing::debug!(from = live, to = target, "scaled down");
        }

        self.draining.retain(|task| !task.is_finished());
    }

    fn spawn_one(&mut self) {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);

        let retire = self.stop.child_token();
        let task = tokio::spawn(run_vu(id, self.shared.clone(), retire.clone()));
        self.live.push(VuHandle { id, retire, task });
    }

    /// Stops every unit and waits until all of them have finished their
    /// in-flight iteration.
    pub(crate) async fn shutdown(self) {
        self.stop.cancel();

        let tasks = self
            .live
            .into_iter()
            .map(|vu| vu.task)
            .chain(self.draining);
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "virtual user task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::metrics::{self, EngineMetrics};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use surge_metrics::Registry;

    type Scenario = Box<
        dyn Fn(
                IterationContext,
            ) -> std::pin::Pin<
                Box<dyn Future<Output = Result<IterationOutcome, String>> + Send>,
            > + Send
            + Sync,
    >;

    fn pool(in_flight: Arc<AtomicU64>) -> VuPool<Scenario> {
        let registry = Arc::new(Registry::new());
        metrics::register_all(&registry, &[]).unwrap_or_else(|e| panic!("{e}"));
        let engine = EngineMetrics::new(&registry).unwrap_or_else(|e| panic!("{e}"));
        let scenario: Scenario = Box::new(move |_ctx| {
            let in_flight = in_flight.clone();
            Box::pin(async move {
                in_flight.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(300)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(IterationOutcome::think(Duration::from_millis(100)))
            })
        });
        VuPool::new(
            Arc::new(VuShared {
                scenario,
                registry,
                metrics: engine,
                base_url: Arc::from("http://test"),
                think_time: None,
            }),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn scales_up_and_down_lifo() {
        let in_flight = Arc::new(AtomicU64::new(0));
        let mut p = pool(in_flight.clone());

        p.reconcile(5);
        assert_eq!(p.live(), 5);
        assert_eq!(
            p.live.iter().map(|v| v.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        p.reconcile(2);
        assert_eq!(p.live(), 2);
        assert_eq!(p.live.iter().map(|v| v.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(p.draining(), 3);

        p.reconcile(4);
        assert_eq!(
            p.live.iter().map(|v| v.id).collect::<Vec<_>>(),
            vec![1, 2, 6, 7]
        );

        p.shutdown().await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retired_units_drain_then_disappear() {
        let in_flight = Arc::new(AtomicU64::new(0));
        let mut p = pool(in_flight.clone());

        p.reconcile(3);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 3);

        p.reconcile(0);
        assert_eq!(p.live(), 0);
        assert_eq!(p.draining(), 3);

        // Still mid-iteration: nothing was cut short.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        p.reconcile(0);
        assert_eq!(p.draining(), 0);

        p.shutdown().await;
    }
}

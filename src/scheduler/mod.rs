//! Bounded-parallelism batch execution.
//!
//! A batch is a set of independent [`WorkUnit`]s. A fixed pool of workers
//! drains a shared queue; each unit runs in its own task so a panic stays
//! local to that unit. The caller waits for the whole batch with periodic
//! stall reports. Nothing is ever cancelled and there is no batch deadline.

pub mod queue;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;

pub use queue::WorkQueue;

/// How many queued labels a stall report lists.
const STALL_LABEL_LIMIT: usize = 25;

/// One independent piece of work inside a batch.
#[async_trait]
pub trait WorkUnit: Send + Sync + 'static {
    /// Short identifier used in progress and stall logs.
    fn label(&self) -> String;

    /// Run to completion. Failures are recorded by the unit itself.
    async fn execute(&self);
}

/// Completion statistics for one batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchSummary {
    pub phase: String,
    pub total: usize,
    /// Units whose task panicked or was aborted.
    pub crashed: usize,
    pub elapsed_ms: u128,
}

/// Runs batches of units across a fixed worker pool.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    workers: usize,
    stall_window: Duration,
}

impl Orchestrator {
    pub fn new(workers: usize, stall_window: Duration) -> Self {
        Self {
            workers: workers.max(1),
            stall_window,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.worker_count(), config.stall_window())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Drive every unit to completion, in random order.
    pub async fn run_batch<U: WorkUnit>(&self, phase: &str, mut units: Vec<U>) -> BatchSummary {
        let started = Instant::now();
        units.shuffle(&mut rand::thread_rng());
        let total = units.len();
        info!(%phase, total, workers = self.workers, "starting batch");

        let queue = Arc::new(WorkQueue::new(units));
        let remaining = Arc::new(AtomicUsize::new(total));
        let crashed = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(Notify::new());

        let mut pool = JoinSet::new();
        for worker in 0..self.workers.min(total) {
            let queue = Arc::clone(&queue);
            let remaining = Arc::clone(&remaining);
            let crashed = Arc::clone(&crashed);
            let finished = Arc::clone(&finished);

            pool.spawn(async move {
                while let Some(unit) = queue.pop() {
                    let label = unit.label();
                    // Separate task per unit: a panic surfaces as a JoinError here.
                    let handle = tokio::spawn(async move { unit.execute().await });
                    if let Err(e) = handle.await {
                        error!(worker, unit = %label, error = %e, "unit failed due to a panic");
                        crashed.fetch_add(1, Ordering::Relaxed);
                    }
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        finished.notify_one();
                    }
                }
            });
        }

        while remaining.load(Ordering::Acquire) > 0 {
            if tokio::time::timeout(self.stall_window, finished.notified())
                .await
                .is_err()
            {
                let left = remaining.load(Ordering::Acquire);
                if left == 0 {
                    break;
                }
                info!(%phase, remaining = left, "batch still running");
                if !queue.is_empty() {
                    info!(
                        %phase,
                        queued = queue.len(),
                        next = ?queue.pending_labels(STALL_LABEL_LIMIT),
                        "units still in queue"
                    );
                }
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(%phase, error = %e, "worker exited abnormally");
            }
        }

        let summary = BatchSummary {
            phase: phase.to_string(),
            total,
            crashed: crashed.load(Ordering::Relaxed),
            elapsed_ms: started.elapsed().as_millis(),
        };
        if summary.crashed == 0 {
            info!(%phase, total, elapsed_ms = summary.elapsed_ms, "all units have completed");
        } else {
            warn!(
                %phase,
                total,
                crashed = summary.crashed,
                elapsed_ms = summary.elapsed_ms,
                "batch completed with crashed units"
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Counting {
        id: usize,
        seen: Arc<Mutex<Vec<usize>>>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkUnit for Counting {
        fn label(&self) -> String {
            format!("unit-{}", self.id)
        }

        async fn execute(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(self.id);
        }
    }

    struct Panicking;

    #[async_trait]
    impl WorkUnit for Panicking {
        fn label(&self) -> String {
            "boom".to_string()
        }

        async fn execute(&self) {
            panic!("unit blew up");
        }
    }

    enum Mixed {
        Ok(Arc<AtomicUsize>),
        Bad(Panicking),
    }

    #[async_trait]
    impl WorkUnit for Mixed {
        fn label(&self) -> String {
            match self {
                Mixed::Ok(_) => "ok".to_string(),
                Mixed::Bad(p) => p.label(),
            }
        }

        async fn execute(&self) {
            match self {
                Mixed::Ok(done) => {
                    done.fetch_add(1, Ordering::SeqCst);
                }
                Mixed::Bad(p) => p.execute().await,
            }
        }
    }

    #[tokio::test]
    async fn test_runs_every_unit_within_pool_bound() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let units: Vec<Counting> = (0..40)
            .map(|id| Counting {
                id,
                seen: Arc::clone(&seen),
                in_flight: Arc::clone(&in_flight),
                peak: Arc::clone(&peak),
            })
            .collect();

        let orchestrator = Orchestrator::new(4, Duration::from_millis(50));
        let summary = orchestrator.run_batch("test", units).await;

        assert_eq!(summary.total, 40);
        assert_eq!(summary.crashed, 0);
        let mut ids = seen.lock().unwrap().clone();
        ids.sort_unstable();
        assert_eq!(ids, (0..40).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_panicking_unit_does_not_fail_batch() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut units: Vec<Mixed> = (0..10).map(|_| Mixed::Ok(Arc::clone(&done))).collect();
        units.insert(3, Mixed::Bad(Panicking));
        units.push(Mixed::Bad(Panicking));

        let summary = Orchestrator::new(2, Duration::from_secs(1))
            .run_batch("test", units)
            .await;

        assert_eq!(summary.total, 12);
        assert_eq!(summary.crashed, 2);
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_empty_batch_returns_immediately() {
        let summary = Orchestrator::new(8, Duration::from_secs(60))
            .run_batch::<Panicking>("empty", Vec::new())
            .await;
        assert_eq!(summary.total, 0);
    }

    #[tokio::test]
    async fn test_slow_unit_outlives_stall_window() {
        struct Slow(Arc<AtomicUsize>);

        #[async_trait]
        impl WorkUnit for Slow {
            fn label(&self) -> String {
                "slow".to_string()
            }

            async fn execute(&self) {
                tokio::time::sleep(Duration::from_millis(120)).await;
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let done = Arc::new(AtomicUsize::new(0));
        let units = vec![Slow(Arc::clone(&done)), Slow(Arc::clone(&done))];
        Orchestrator::new(1, Duration::from_millis(20))
            .run_batch("slow", units)
            .await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }
}

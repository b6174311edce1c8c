//! Background lane.
//!
//! Prefetch, outcome aggregation and periodic maintenance run as independent
//! tokio tasks fed by bounded queues. Submissions from the hot lane never
//! wait: a full queue drops the job. Every worker holds off while the
//! [`LoadGovernor`] reports the hot lane as slow or backlogged, and CPU-bound
//! work runs on the blocking pool.
//!
//! # Example
//!
//! ```rust,ignore
//! let lane = BackgroundLane::spawn(target, &config.workers);
//! engine.attach_lane(lane.handle());
//! // ...
//! lane.shutdown().await;
//! ```

mod governor;

pub use governor::{LaneState, LoadGovernor};

use crate::config::WorkerConfig;
use crate::models::{AdviceContext, ToolEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// How often a paused worker re-checks for an idle hot lane.
const PAUSE_POLL: Duration = Duration::from_millis(250);

/// Work the background lane performs.
///
/// Every method is blocking and runs on the blocking thread pool.
pub trait LaneTarget: Send + Sync + 'static {
    /// Ranks and caches a packet for a predicted context.
    fn prefetch(&self, context: AdviceContext);

    /// Feeds a completed tool call to the feedback loop.
    fn apply_outcome(&self, event: ToolEvent);

    /// Sweeps the cache and expires stale state.
    fn maintain(&self);

    /// Persists statistics and the cache index.
    fn flush(&self);
}

/// Cheap handle the hot lane uses to submit work.
#[derive(Debug, Clone)]
pub struct LaneHandle {
    prefetch_tx: mpsc::Sender<AdviceContext>,
    outcome_tx: mpsc::Sender<ToolEvent>,
    governor: Arc<LoadGovernor>,
}

impl LaneHandle {
    /// Queues a prefetch. Returns false if the job was dropped.
    pub fn submit_prefetch(&self, context: AdviceContext) -> bool {
        let accepted = self.prefetch_tx.try_send(context).is_ok();
        if !accepted {
            metrics::counter!("advisory_lane_dropped_total", "queue" => "prefetch").increment(1);
        }
        metrics::gauge!("advisory_lane_queue_depth", "queue" => "prefetch")
            .set(depth_value(&self.prefetch_tx));
        accepted
    }

    /// Queues an outcome. Returns false if the event was dropped.
    pub fn submit_outcome(&self, event: ToolEvent) -> bool {
        let accepted = self.outcome_tx.try_send(event).is_ok();
        if !accepted {
            metrics::counter!("advisory_lane_dropped_total", "queue" => "outcome").increment(1);
        }
        metrics::gauge!("advisory_lane_queue_depth", "queue" => "outcome")
            .set(depth_value(&self.outcome_tx));
        accepted
    }

    /// The lane's load governor.
    #[must_use]
    pub fn governor(&self) -> &LoadGovernor {
        &self.governor
    }
}

#[allow(clippy::cast_precision_loss)]
fn depth_value<T>(tx: &mpsc::Sender<T>) -> f64 {
    tx.max_capacity().saturating_sub(tx.capacity()) as f64
}

/// Running background lane.
#[derive(Debug)]
pub struct BackgroundLane {
    handle: LaneHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    target: Arc<dyn LaneTarget>,
}

impl std::fmt::Debug for dyn LaneTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LaneTarget")
    }
}

impl BackgroundLane {
    /// Spawns all workers on the current tokio runtime.
    #[must_use]
    pub fn spawn(target: Arc<dyn LaneTarget>, config: &WorkerConfig) -> Self {
        let (prefetch_tx, prefetch_rx) = mpsc::channel(config.prefetch_queue.max(1));
        let (outcome_tx, outcome_rx) = mpsc::channel(config.outcome_queue.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let governor = Arc::new(LoadGovernor::new(config));

        let mut tasks = Vec::new();
        let prefetch_rx = Arc::new(AsyncMutex::new(prefetch_rx));
        for worker in 0..config.prefetch_workers.max(1) {
            tasks.push(tokio::spawn(prefetch_worker(
                worker,
                Arc::clone(&target),
                Arc::clone(&prefetch_rx),
                Arc::clone(&governor),
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(outcome_worker(
            Arc::clone(&target),
            outcome_rx,
            Arc::clone(&governor),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(maintenance_worker(
            Arc::clone(&target),
            Duration::from_secs(config.sweep_interval_secs.max(1)),
            Arc::clone(&governor),
            shutdown_rx,
        )));

        tracing::info!(
            prefetch_workers = config.prefetch_workers.max(1),
            prefetch_queue = config.prefetch_queue,
            outcome_queue = config.outcome_queue,
            "Background lane started"
        );

        Self {
            handle: LaneHandle {
                prefetch_tx,
                outcome_tx,
                governor,
            },
            shutdown,
            tasks,
            target,
        }
    }

    /// Handle for submitting work.
    #[must_use]
    pub fn handle(&self) -> LaneHandle {
        self.handle.clone()
    }

    /// Stops all workers and flushes state once.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background worker ended abnormally");
            }
        }
        let target = self.target;
        if let Err(e) = tokio::task::spawn_blocking(move || target.flush()).await {
            tracing::warn!(error = %e, "Final flush failed");
        }
        tracing::info!("Background lane stopped");
    }
}

/// Waits until the lane is running. Returns false on shutdown.
async fn wait_until_running(governor: &LoadGovernor, shutdown: &mut watch::Receiver<bool>) -> bool {
    let mut state = governor.subscribe();
    while governor.is_paused() {
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = shutdown.changed() => return false,
            _ = state.changed() => {},
            () = tokio::time::sleep(PAUSE_POLL) => governor.relax_if_idle(),
        }
    }
    !*shutdown.borrow()
}

async fn prefetch_worker(
    worker: usize,
    target: Arc<dyn LaneTarget>,
    queue: Arc<AsyncMutex<mpsc::Receiver<AdviceContext>>>,
    governor: Arc<LoadGovernor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if !wait_until_running(&governor, &mut shutdown).await {
            break;
        }
        let job = tokio::select! {
            _ = shutdown.changed() => break,
            job = async { queue.lock().await.recv().await } => job,
        };
        let Some(context) = job else { break };
        // The lane may have paused while this worker sat in `recv`.
        if !wait_until_running(&governor, &mut shutdown).await {
            break;
        }

        let target = Arc::clone(&target);
        if let Err(e) = tokio::task::spawn_blocking(move || target.prefetch(context)).await {
            tracing::warn!(worker, error = %e, "Prefetch job panicked");
        }
    }
    tracing::debug!(worker, "Prefetch worker stopped");
}

async fn outcome_worker(
    target: Arc<dyn LaneTarget>,
    mut queue: mpsc::Receiver<ToolEvent>,
    governor: Arc<LoadGovernor>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if !wait_until_running(&governor, &mut shutdown).await {
            break;
        }
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = queue.recv() => event,
        };
        let Some(event) = event else { break };
        let running = wait_until_running(&governor, &mut shutdown).await;

        let target = Arc::clone(&target);
        if let Err(e) = tokio::task::spawn_blocking(move || target.apply_outcome(event)).await {
            tracing::warn!(error = %e, "Outcome job panicked");
        }
        if !running {
            break;
        }
    }

    // Outcomes already queued are cheap and carry feedback signal; drain them.
    queue.close();
    while let Some(event) = queue.recv().await {
        let target = Arc::clone(&target);
        let _ = tokio::task::spawn_blocking(move || target.apply_outcome(event)).await;
    }
    tracing::debug!("Outcome worker stopped");
}

async fn maintenance_worker(
    target: Arc<dyn LaneTarget>,
    period: Duration,
    governor: Arc<LoadGovernor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if governor.is_paused() {
                    tracing::debug!("Skipping maintenance while paused");
                    continue;
                }
                let target = Arc::clone(&target);
                let result = tokio::task::spawn_blocking(move || {
                    target.maintain();
                    target.flush();
                })
                .await;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Maintenance job panicked");
                }
            }
        }
    }
    tracing::debug!("Maintenance worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        prefetched: AtomicUsize,
        outcomes: AtomicUsize,
        maintained: AtomicUsize,
        flushed: AtomicUsize,
    }

    impl LaneTarget for Counting {
        fn prefetch(&self, _context: AdviceContext) {
            self.prefetched.fetch_add(1, Ordering::SeqCst);
        }

        fn apply_outcome(&self, _event: ToolEvent) {
            self.outcomes.fetch_add(1, Ordering::SeqCst);
        }

        fn maintain(&self) {
            self.maintained.fetch_add(1, Ordering::SeqCst);
        }

        fn flush(&self) {
            self.flushed.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn context() -> AdviceContext {
        AdviceContext::new("/p", "s1", "Edit")
    }

    #[tokio::test]
    async fn test_processes_jobs_and_flushes_on_shutdown() {
        let target = Arc::new(Counting::default());
        let lane = BackgroundLane::spawn(target.clone(), &WorkerConfig::default());
        let handle = lane.handle();

        assert!(handle.submit_prefetch(context()));
        assert!(handle.submit_outcome(ToolEvent::new(EventKind::PostTool, "s1", 1)));

        assert!(eventually(|| target.prefetched.load(Ordering::SeqCst) == 1).await);
        assert!(eventually(|| target.outcomes.load(Ordering::SeqCst) == 1).await);

        lane.shutdown().await;
        assert_eq!(target.flushed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let target = Arc::new(Counting::default());
        let config = WorkerConfig {
            prefetch_queue: 1,
            ..WorkerConfig::default()
        };
        let lane = BackgroundLane::spawn(target.clone(), &config);
        let handle = lane.handle();

        // Parked workers hold at most one job each, so the queue fills.
        handle.governor().observe(Duration::from_secs(5), 0);
        let accepted = (0..10).filter(|_| handle.submit_prefetch(context())).count();
        assert!(accepted < 10);
        assert_eq!(target.prefetched.load(Ordering::SeqCst), 0);

        lane.shutdown().await;
    }

    #[tokio::test]
    async fn test_paused_lane_holds_work_until_resumed() {
        let target = Arc::new(Counting::default());
        let lane = BackgroundLane::spawn(target.clone(), &WorkerConfig::default());
        let handle = lane.handle();

        handle.governor().observe(Duration::from_secs(5), 0);
        assert!(handle.submit_prefetch(context()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(target.prefetched.load(Ordering::SeqCst), 0);

        for _ in 0..40 {
            handle.governor().observe(Duration::from_millis(1), 0);
        }
        assert!(eventually(|| target.prefetched.load(Ordering::SeqCst) == 1).await);

        lane.shutdown().await;
    }
}

// src/lifecycle/shutdown.rs
use super::Deadline;
use crate::metrics::MetricsCollector;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

type ActionFn = Box<dyn FnOnce(Deadline) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

struct ShutdownAction {
    name: String,
    run: ActionFn,
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("shutdown did not complete within {timeout:?}")]
    DeadlineExceeded { timeout: Duration },

    #[error("shutdown action `{name}` failed: {source}")]
    Action {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("shutdown action `{name}` panicked")]
    Panicked { name: String },

    #[error("shutdown has already been started")]
    AlreadyStarted,
}

/// Runs every registered cleanup action concurrently and returns within one
/// shared timeout.
///
/// Actions are spawned as detached tasks. When the deadline passes, or an
/// action fails, the coordinator stops waiting and returns; anything still
/// running keeps going in the background and logs its own outcome. Actions
/// receive the bounded [`Deadline`] and must honour it themselves.
///
/// The coordinator is one-shot: the first [`shutdown`](Self::shutdown) call
/// consumes the registered actions.
pub struct ShutdownCoordinator {
    timeout: Duration,
    actions: Mutex<Vec<ShutdownAction>>,
    started: AtomicBool,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            actions: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of actions waiting for the shutdown sequence.
    pub fn pending(&self) -> usize {
        self.lock_actions().len()
    }

    #[cfg(test)]
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Register a cleanup action. `name` only labels logs and errors.
    ///
    /// Registering after shutdown has begun drops the action with a warning.
    pub fn add_handler<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce(Deadline) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let mut actions = self.lock_actions();

        if self.started.load(Ordering::SeqCst) {
            warn!(action = %name, "Shutdown already started, ignoring late handler");
            return;
        }

        debug!(action = %name, "Registered shutdown handler");
        actions.push(ShutdownAction {
            name,
            run: Box::new(move |deadline| action(deadline).boxed()),
        });
    }

    /// Run every action once, bounded by `min(parent, now + timeout)`.
    ///
    /// Returns the first action error to arrive, or
    /// [`ShutdownError::DeadlineExceeded`] if the deadline passes first.
    pub async fn shutdown(&self, parent: Deadline) -> Result<(), ShutdownError> {
        let actions = {
            let mut actions = self.lock_actions();
            if self.started.swap(true, Ordering::SeqCst) {
                return Err(ShutdownError::AlreadyStarted);
            }
            std::mem::take(&mut *actions)
        };

        let deadline = parent.bounded(self.timeout);
        let total = actions.len();
        info!(
            actions = total,
            timeout = ?self.timeout,
            "Starting graceful shutdown"
        );

        if total == 0 {
            return Ok(());
        }

        let (result_tx, mut result_rx) = mpsc::channel(total);
        for action in actions {
            let result_tx = result_tx.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let result = run_action(action, deadline, metrics).await;
                // The receiver is gone once the coordinator has returned.
                let _ = result_tx.send(result).await;
            });
        }
        drop(result_tx);

        let mut outstanding = total;
        loop {
            tokio::select! {
                _ = deadline.expired() => {
                    warn!(outstanding, "Shutdown deadline exceeded, abandoning remaining actions");
                    return Err(ShutdownError::DeadlineExceeded { timeout: self.timeout });
                }
                result = result_rx.recv() => match result {
                    Some(Ok(())) => {
                        outstanding -= 1;
                        if outstanding == 0 {
                            info!("All shutdown actions completed");
                            return Ok(());
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    // every task reports, so a closed channel means nothing is left
                    None => return Ok(()),
                }
            }
        }
    }

    fn lock_actions(&self) -> MutexGuard<'_, Vec<ShutdownAction>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_action(
    action: ShutdownAction,
    deadline: Deadline,
    metrics: Option<Arc<MetricsCollector>>,
) -> Result<(), ShutdownError> {
    let ShutdownAction { name, run } = action;
    let start = Instant::now();

    let outcome = AssertUnwindSafe(async move { run(deadline).await })
        .catch_unwind()
        .await;
    let elapsed = start.elapsed();

    // The coordinator has already returned; only this log records the outcome.
    if deadline.is_expired() {
        warn!(action = %name, ?elapsed, "Shutdown action finished after the deadline");
    }

    let (label, result) = match outcome {
        Ok(Ok(())) => {
            info!(action = %name, ?elapsed, "Shutdown action completed");
            ("ok", Ok(()))
        }
        Ok(Err(source)) => {
            error!(action = %name, ?elapsed, error = %source, "Shutdown action failed");
            ("error", Err(ShutdownError::Action { name, source }))
        }
        Err(_) => {
            error!(action = %name, ?elapsed, "Shutdown action panicked");
            ("panic", Err(ShutdownError::Panicked { name }))
        }
    };

    if let Some(metrics) = &metrics {
        metrics.record_shutdown_action(label);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn counting(coordinator: &ShutdownCoordinator, name: &str, calls: &Arc<AtomicUsize>, delay: Duration) {
        let calls = calls.clone();
        coordinator.add_handler(name, move |_deadline| async move {
            sleep(delay).await;
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_actions_returns_immediately() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        let start = Instant::now();

        coordinator.shutdown(Deadline::unbounded()).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_action_runs_exactly_once() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            counting(&coordinator, &format!("action-{i}"), &calls, Duration::from_millis(10 * i));
        }
        assert_eq!(coordinator.pending(), 5);

        coordinator.shutdown(Deadline::unbounded()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(coordinator.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_error_fails_fast_while_others_finish() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));
        counting(&coordinator, "slow-a", &calls, Duration::from_secs(1));
        counting(&coordinator, "slow-b", &calls, Duration::from_secs(2));
        coordinator.add_handler("cache", |_| async { Err(anyhow::anyhow!("connection reset")) });

        let start = Instant::now();
        let err = coordinator.shutdown(Deadline::unbounded()).await.unwrap_err();

        assert!(matches!(err, ShutdownError::Action { ref name, .. } if name == "cache"));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(start.elapsed(), Duration::ZERO);

        // the remaining actions were spawned regardless and run to completion
        sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_action_is_abandoned_at_timeout() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        coordinator.add_handler("stuck", move |_deadline| async move {
            sleep(Duration::from_secs(60)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let start = Instant::now();
        let err = coordinator.shutdown(Deadline::unbounded()).await.unwrap_err();

        assert!(matches!(err, ShutdownError::DeadlineExceeded { timeout } if timeout == Duration::from_secs(5)));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(!finished.load(Ordering::SeqCst));

        // detached, not cancelled
        sleep(Duration::from_secs(60)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_deadline_bounds_configured_timeout() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        coordinator.add_handler("stuck", |_| async {
            sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let start = Instant::now();
        let result = coordinator
            .shutdown(Deadline::after(Duration::from_secs(2)))
            .await;

        assert!(matches!(result, Err(ShutdownError::DeadlineExceeded { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_receive_the_bounded_deadline() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(3));
        coordinator.add_handler("cooperative", |deadline: Deadline| async move {
            assert_eq!(deadline.remaining(), Some(Duration::from_secs(3)));
            deadline.run(sleep(Duration::from_secs(60))).await?;
            Ok(())
        });

        let err = coordinator.shutdown(Deadline::unbounded()).await.unwrap_err();

        // either branch may win the race at the deadline
        assert!(matches!(
            err,
            ShutdownError::DeadlineExceeded { .. } | ShutdownError::Action { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_action_is_reported() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        coordinator.add_handler("tracer", |_| async {
            if true {
                panic!("flush exploded");
            }
            Ok(())
        });

        let err = coordinator.shutdown(Deadline::unbounded()).await.unwrap_err();

        assert!(matches!(err, ShutdownError::Panicked { ref name } if name == "tracer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_shutdown_is_rejected() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));
        counting(&coordinator, "db", &calls, Duration::ZERO);

        coordinator.shutdown(Deadline::unbounded()).await.unwrap();
        let second = coordinator.shutdown(Deadline::unbounded()).await;

        assert!(matches!(second, Err(ShutdownError::AlreadyStarted)));
        assert!(coordinator.is_started());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_handler_is_ignored() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
        coordinator.shutdown(Deadline::unbounded()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        counting(&coordinator, "late", &calls, Duration::ZERO);

        assert_eq!(coordinator.pending(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_count_action_results() {
        let registry = crate::metrics::MetricsRegistry::new().unwrap();
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(30))
            .with_metrics(registry.collector());
        coordinator.add_handler("ok", |_| async { Ok(()) });
        coordinator.add_handler("also-ok", |_| async { Ok(()) });

        coordinator.shutdown(Deadline::unbounded()).await.unwrap();

        let metrics = registry.collector();
        assert_eq!(metrics.shutdown_actions_total.with_label_values(&["ok"]).get(), 2);
    }
}

//! Bounded-retry polling of a server-owned job.
//!
//! The poller fetches the job status once after an initial delay and then
//! once per interval, handing every observation to a callback:
//! - a status other than `iniciado`/`en_progreso` is terminal and ends the loop
//! - the first failed fetch is reported as a synthetic error and ends the loop
//! - running out of attempts is reported as a synthetic timeout
//!
//! After `PollHandle::stop` returns no further update is delivered, even
//! when a fetch was still in flight. A callback that is already running
//! when `stop` is called finishes before `stop` returns, on any runtime
//! flavor; the callback itself must not call `stop`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::error::{AppError, Result};
use crate::domain::execution::{ExecutionSnapshot, PollSettings};
use crate::infrastructure::qa_pilot::QaPilotApi;

/// Anything that can report the current status of a job.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<ExecutionSnapshot>;
}

#[async_trait]
impl<T: QaPilotApi + ?Sized> StatusSource for T {
    async fn fetch_status(&self, job_id: &str) -> Result<ExecutionSnapshot> {
        self.execution_status(job_id).await
    }
}

/// One observation delivered to the poll callback.
#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    Progress(ExecutionSnapshot),
    Finished(ExecutionSnapshot),
    FetchFailed(AppError),
    TimedOut { attempts: u32 },
}

impl PollUpdate {
    /// True for the last update of a loop.
    pub fn is_final(&self) -> bool {
        !matches!(self, PollUpdate::Progress(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Finished(ExecutionSnapshot),
    Failed(AppError),
    TimedOut { attempts: u32 },
    Stopped,
}

impl PollOutcome {
    pub fn into_result(self) -> Result<ExecutionSnapshot> {
        match self {
            PollOutcome::Finished(snapshot) => Ok(snapshot),
            PollOutcome::Failed(err) => Err(err),
            PollOutcome::TimedOut { attempts } => Err(AppError::TimeoutError(format!(
                "Execution still running after {} status checks",
                attempts
            ))),
            PollOutcome::Stopped => Err(AppError::Internal(
                "Execution monitoring was stopped".to_string(),
            )),
        }
    }
}

pub struct StatusPoller;

impl StatusPoller {
    /// Spawns the polling loop on the current tokio runtime.
    pub fn start<S, F>(
        source: Arc<S>,
        job_id: impl Into<String>,
        settings: PollSettings,
        on_update: F,
    ) -> PollHandle
    where
        S: StatusSource + ?Sized + 'static,
        F: FnMut(PollUpdate) + Send + 'static,
    {
        let job_id = job_id.into();
        let stopped = Arc::new(AtomicBool::new(false));
        let delivery = Arc::new(Mutex::new(()));
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let outcome_tx = Arc::new(outcome_tx);

        let task = tokio::spawn(run_loop(
            source,
            job_id.clone(),
            settings,
            on_update,
            Arc::clone(&stopped),
            Arc::clone(&delivery),
            Arc::clone(&outcome_tx),
        ));

        PollHandle {
            job_id,
            stopped,
            delivery,
            task: Mutex::new(Some(task)),
            outcome_tx,
            outcome_rx,
        }
    }
}

async fn run_loop<S, F>(
    source: Arc<S>,
    job_id: String,
    settings: PollSettings,
    mut on_update: F,
    stopped: Arc<AtomicBool>,
    delivery: Arc<Mutex<()>>,
    outcome_tx: Arc<watch::Sender<Option<PollOutcome>>>,
) where
    S: StatusSource + ?Sized,
    F: FnMut(PollUpdate) + Send,
{
    // The check and the call happen under the same lock `stop` takes.
    let mut deliver = |update: PollUpdate| {
        let _delivery = delivery.lock().unwrap_or_else(PoisonError::into_inner);
        if !stopped.load(Ordering::SeqCst) {
            on_update(update);
        }
    };

    tokio::time::sleep(settings.initial_delay).await;

    let mut attempts: u32 = 0;
    loop {
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        attempts += 1;
        let fetched = source.fetch_status(&job_id).await;
        if stopped.load(Ordering::SeqCst) {
            debug!(job_id = %job_id, "Discarding status that arrived after stop");
            return;
        }

        let outcome = match fetched {
            Ok(snapshot) if snapshot.is_terminal() => {
                info!(
                    job_id = %job_id,
                    status = %snapshot.status,
                    attempts,
                    "Job reached terminal status"
                );
                deliver(PollUpdate::Finished(snapshot.clone()));
                PollOutcome::Finished(snapshot)
            }
            Ok(snapshot) => {
                debug!(
                    job_id = %job_id,
                    status = %snapshot.status,
                    progress = snapshot.progress,
                    attempts,
                    "Job still running"
                );
                deliver(PollUpdate::Progress(snapshot));
                if attempts < settings.max_attempts {
                    tokio::time::sleep(settings.interval).await;
                    continue;
                }
                warn!(job_id = %job_id, attempts, "Polling attempt budget exhausted");
                deliver(PollUpdate::TimedOut { attempts });
                PollOutcome::TimedOut { attempts }
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, attempts, "Status fetch failed, stopping poll");
                deliver(PollUpdate::FetchFailed(err.clone()));
                PollOutcome::Failed(err)
            }
        };

        publish(&outcome_tx, outcome);
        return;
    }
}

/// Records the outcome unless one is already set.
fn publish(outcome_tx: &watch::Sender<Option<PollOutcome>>, outcome: PollOutcome) {
    outcome_tx.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(outcome);
            true
        } else {
            false
        }
    });
}

pub struct PollHandle {
    job_id: String,
    stopped: Arc<AtomicBool>,
    delivery: Arc<Mutex<()>>,
    task: Mutex<Option<JoinHandle<()>>>,
    outcome_tx: Arc<watch::Sender<Option<PollOutcome>>>,
    outcome_rx: watch::Receiver<Option<PollOutcome>>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Idempotent. Safe to call after the loop ended on its own, in which
    /// case the natural outcome is kept. Blocks while an update is being
    /// delivered.
    pub fn stop(&self) {
        {
            let _delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
            if self.stopped.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        publish(&self.outcome_tx, PollOutcome::Stopped);
        debug!(job_id = %self.job_id, "Polling stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.outcome_rx.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<PollOutcome> {
        self.outcome_rx.borrow().clone()
    }

    /// Resolves once the loop has ended for any reason.
    pub async fn wait(&self) -> PollOutcome {
        let mut rx = self.outcome_rx.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return PollOutcome::Stopped;
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::JobStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<ExecutionSnapshot>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<ExecutionSnapshot>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(&self, _job_id: &str) -> Result<ExecutionSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(snapshot("en_progreso", 50.0)))
        }
    }

    struct GatedSource {
        gate: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatusSource for GatedSource {
        async fn fetch_status(&self, _job_id: &str) -> Result<ExecutionSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(snapshot("completado", 100.0))
        }
    }

    fn snapshot(status: &str, progress: f64) -> ExecutionSnapshot {
        ExecutionSnapshot {
            status: JobStatus::from(status),
            progress,
            ..Default::default()
        }
    }

    fn settings(max_attempts: u32) -> PollSettings {
        PollSettings {
            initial_delay: Duration::from_millis(1000),
            interval: Duration::from_millis(2000),
            max_attempts,
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<PollUpdate>>>, impl FnMut(PollUpdate) + Send + 'static) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        (updates, move |update| sink.lock().unwrap().push(update))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_terminal_status() {
        let source = ScriptedSource::new(vec![
            Ok(snapshot("en_progreso", 40.0)),
            Ok(snapshot("completado", 100.0)),
        ]);
        let (updates, on_update) = recorder();

        let handle = StatusPoller::start(Arc::clone(&source), "job-1", settings(10), on_update);
        let outcome = handle.wait().await;

        assert_eq!(outcome, PollOutcome::Finished(snapshot("completado", 100.0)));
        assert_eq!(source.calls(), 2);
        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[0], PollUpdate::Progress(s) if s.progress == 40.0));
        assert!(matches!(&updates[1], PollUpdate::Finished(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_waits_for_initial_delay() {
        let source = ScriptedSource::new(Vec::new());
        let (_updates, on_update) = recorder();
        let handle = StatusPoller::start(Arc::clone(&source), "job-2", settings(10), on_update);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls(), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(source.calls(), 1);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(source.calls(), 2);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_more_fetches_after_terminal() {
        let source = ScriptedSource::new(vec![Ok(snapshot("fallido", 60.0))]);
        let (updates, on_update) = recorder();
        let handle = StatusPoller::start(Arc::clone(&source), "job-3", settings(10), on_update);

        handle.wait().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(source.calls(), 1);
        assert_eq!(updates.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_yields_single_timeout() {
        let source = ScriptedSource::new(Vec::new());
        let (updates, on_update) = recorder();
        let handle = StatusPoller::start(Arc::clone(&source), "job-4", settings(3), on_update);

        let outcome = handle.wait().await;

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 3 });
        assert_eq!(source.calls(), 3);
        let updates = updates.lock().unwrap();
        let timeouts = updates
            .iter()
            .filter(|u| matches!(u, PollUpdate::TimedOut { .. }))
            .count();
        assert_eq!(timeouts, 1);
        assert!(!updates.iter().any(|u| matches!(u, PollUpdate::Finished(_))));
        assert!(matches!(
            outcome.into_result(),
            Err(AppError::TimeoutError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_stops_polling() {
        let source = ScriptedSource::new(vec![Err(AppError::NetworkError(
            "connection refused".to_string(),
        ))]);
        let (updates, on_update) = recorder();
        let handle = StatusPoller::start(Arc::clone(&source), "job-5", settings(10), on_update);

        let outcome = handle.wait().await;
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(matches!(outcome, PollOutcome::Failed(AppError::NetworkError(_))));
        assert_eq!(source.calls(), 1);
        assert_eq!(
            *updates.lock().unwrap(),
            vec![PollUpdate::FetchFailed(AppError::NetworkError(
                "connection refused".to_string()
            ))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_update_after_stop_with_fetch_in_flight() {
        let source = Arc::new(GatedSource {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let (updates, on_update) = recorder();
        let handle = StatusPoller::start(Arc::clone(&source), "job-6", settings(10), on_update);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        handle.stop();
        source.gate.notify_waiters();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(updates.lock().unwrap().is_empty());
        assert_eq!(handle.wait().await, PollOutcome::Stopped);
        handle.stop();
        assert_eq!(handle.outcome(), Some(PollOutcome::Stopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_running_callback() {
        let source = ScriptedSource::new(Vec::new());
        let delivered = Arc::new(AtomicUsize::new(0));
        let callback_done = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let on_update = {
            let delivered = Arc::clone(&delivered);
            let callback_done = Arc::clone(&callback_done);
            move |_update: PollUpdate| {
                if delivered.fetch_add(1, Ordering::SeqCst) == 0 {
                    let _ = entered_tx.send(());
                    std::thread::sleep(Duration::from_millis(100));
                    callback_done.store(true, Ordering::SeqCst);
                }
            }
        };
        let fast = PollSettings {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(20),
            max_attempts: 1000,
        };
        let handle = StatusPoller::start(Arc::clone(&source), "job-8", fast, on_update);

        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        handle.stop();
        assert!(callback_done.load(Ordering::SeqCst));

        let after_stop = delivered.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), after_stop);
        assert_eq!(after_stop, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_completion_keeps_outcome() {
        let source = ScriptedSource::new(vec![Ok(snapshot("completado", 100.0))]);
        let (_updates, on_update) = recorder();
        let handle = StatusPoller::start(Arc::clone(&source), "job-7", settings(10), on_update);

        handle.wait().await;
        handle.stop();
        handle.stop();

        assert!(handle.is_finished());
        assert!(matches!(handle.outcome(), Some(PollOutcome::Finished(_))));
    }
}

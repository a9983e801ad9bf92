use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

use crate::application::use_cases::case_store::SharedCaseStore;
use crate::application::use_cases::status_poller::{PollHandle, PollUpdate, StatusPoller};
use crate::domain::error::{AppError, Result};
use crate::domain::execution::{
    ExecutionMode, ExecutionOptions, ExecutionResult, ExecutionSnapshot, JobStatus, OutcomeTier,
    PollSettings,
};
use crate::domain::test_case::TestCase;
use crate::infrastructure::qa_pilot::QaPilotApi;

/// The case currently running in a sequential job.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CurrentCase {
    pub name: String,
    pub progress: f64,
    pub step: Option<String>,
}

/// A case the job has already finished, as listed while the job runs.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FinishedCase {
    pub name: String,
    pub success: bool,
    pub message: String,
    pub execution_time: Option<f64>,
    pub url: Option<String>,
}

impl From<&ExecutionResult> for FinishedCase {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            name: result.label(),
            success: result.success,
            message: result.message.clone(),
            execution_time: result.execution_time,
            url: result.tested_url().map(str::to_string),
        }
    }
}

/// What the progress panel shows after each poll.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressView {
    pub execution_id: String,
    pub mode: ExecutionMode,
    pub status: JobStatus,
    pub percentage: f64,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Only reported for sequential jobs.
    pub current_case: Option<CurrentCase>,
    /// Results the server has reported so far, in its order.
    pub results: Vec<FinishedCase>,
}

impl ProgressView {
    pub fn from_snapshot(execution_id: &str, mode: ExecutionMode, snapshot: &ExecutionSnapshot) -> Self {
        let mode = snapshot.execution_mode.unwrap_or(mode);
        let current_case = match (mode, &snapshot.current_case_name) {
            (ExecutionMode::Sequential, Some(name)) if !snapshot.is_terminal() => Some(CurrentCase {
                name: name.clone(),
                progress: snapshot.current_case_progress.unwrap_or(0.0),
                step: snapshot.current_step_description.clone(),
            }),
            _ => None,
        };
        Self {
            execution_id: execution_id.to_string(),
            mode,
            status: snapshot.status.clone(),
            percentage: snapshot.progress.clamp(0.0, 100.0),
            total: snapshot.total_cases,
            completed: snapshot.completed_cases,
            succeeded: snapshot.successful_cases,
            failed: snapshot.failed_cases,
            current_case,
            results: snapshot.results.iter().map(FinishedCase::from).collect(),
        }
    }
}

/// Summary of a job that reached a terminal status.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionReport {
    pub execution_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    /// Results attached to a case of the submitted subset.
    pub matched: usize,
    /// Results whose case could not be identified.
    pub unmatched: usize,
    pub tier: OutcomeTier,
    pub error: Option<String>,
}

/// Receives job events. Called from the polling task, never while the
/// case store is locked.
pub trait ExecutionObserver: Send + Sync {
    fn on_submitted(&self, _execution_id: &str, _mode: ExecutionMode, _cases: usize) {}

    fn on_progress(&self, _view: &ProgressView) {}

    fn on_complete(&self, _report: &CompletionReport) {}

    /// A failed status fetch or an exhausted attempt budget.
    fn on_poll_error(&self, _execution_id: &str, _err: &AppError) {}
}

pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

#[derive(Default)]
struct JobState {
    progress: Mutex<Option<ProgressView>>,
    completion: Mutex<Option<CompletionReport>>,
    report_ready: Mutex<Option<String>>,
}

impl JobState {
    fn reset(&self) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self.completion.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self.report_ready.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

struct ActiveJob {
    execution_id: String,
    handle: Arc<PollHandle>,
}

/// Owns at most one in-flight job: submits it, follows it through the
/// status poller and writes the results back into the case store.
pub struct ExecutionCoordinator {
    api: Arc<dyn QaPilotApi>,
    store: SharedCaseStore,
    observer: Arc<dyn ExecutionObserver>,
    sequential_poll: PollSettings,
    parallel_poll: PollSettings,
    busy: Arc<AtomicBool>,
    job: Mutex<Option<ActiveJob>>,
    state: Arc<JobState>,
}

impl ExecutionCoordinator {
    pub fn new(
        api: Arc<dyn QaPilotApi>,
        store: SharedCaseStore,
        observer: Arc<dyn ExecutionObserver>,
        sequential_poll: PollSettings,
        parallel_poll: PollSettings,
    ) -> Self {
        Self {
            api,
            store,
            observer,
            sequential_poll,
            parallel_poll,
            busy: Arc::new(AtomicBool::new(false)),
            job: Mutex::new(None),
            state: Arc::new(JobState::default()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn execution_id(&self) -> Option<String> {
        self.job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|job| job.execution_id.clone())
    }

    pub fn progress(&self) -> Option<ProgressView> {
        self.state
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn completion(&self) -> Option<CompletionReport> {
        self.state
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execution id whose report can be downloaded, once its job ended.
    pub fn report_ready(&self) -> Option<String> {
        self.state
            .report_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends the cases to the server and starts following the job.
    /// Nothing is polled when the submission fails.
    pub async fn submit(
        &self,
        cases: Vec<TestCase>,
        mode: ExecutionMode,
        options: ExecutionOptions,
    ) -> Result<String> {
        if cases.is_empty() {
            return Err(AppError::ValidationError(
                "No cases selected for execution.".to_string(),
            ));
        }
        let slot = BusySlot::claim(&self.busy).ok_or_else(|| {
            AppError::ValidationError(
                "Another execution is still running. Wait for it to finish or cancel it."
                    .to_string(),
            )
        })?;

        let case_ids: Vec<String> = cases.iter().map(|case| case.id.clone()).collect();
        let execution_id = self
            .api
            .execute_bulk_cases(&cases, mode, options)
            .await
            .map_err(|err| {
                error!(error = %err, cases = cases.len(), mode = %mode, "Bulk submission failed");
                err
            })?;
        slot.keep();

        info!(
            execution_id = %execution_id,
            cases = case_ids.len(),
            mode = %mode,
            show_browser = options.show_browser,
            "Bulk execution started"
        );
        self.state.reset();
        self.observer.on_submitted(&execution_id, mode, case_ids.len());

        let settings = match mode {
            ExecutionMode::Sequential => self.sequential_poll,
            ExecutionMode::Parallel => self.parallel_poll,
        };
        let tracker = JobTracker {
            execution_id: execution_id.clone(),
            mode,
            case_ids,
            store: Arc::clone(&self.store),
            observer: Arc::clone(&self.observer),
            state: Arc::clone(&self.state),
            busy: Arc::clone(&self.busy),
        };
        let handle = StatusPoller::start(
            Arc::clone(&self.api),
            execution_id.clone(),
            settings,
            move |update| tracker.handle(update),
        );

        *self.job.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveJob {
            execution_id: execution_id.clone(),
            handle: Arc::new(handle),
        });
        Ok(execution_id)
    }

    /// One case, always sequential so its step-by-step progress is shown.
    pub async fn execute_single(&self, case: TestCase, options: ExecutionOptions) -> Result<String> {
        self.submit(vec![case], ExecutionMode::Sequential, options).await
    }

    /// Resolves when the current job ends. Fetch failures, timeouts and
    /// cancellation come back as errors.
    pub async fn wait(&self) -> Result<CompletionReport> {
        let handle = self
            .job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|job| Arc::clone(&job.handle))
            .ok_or_else(|| AppError::ValidationError("No execution has been submitted.".to_string()))?;

        handle.wait().await.into_result()?;
        self.completion().ok_or_else(|| {
            AppError::Internal("Execution finished without a completion summary".to_string())
        })
    }

    /// Stops following the current job. The server-side job keeps running.
    pub fn cancel(&self) -> bool {
        let job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(job) = job.as_ref() else {
            return false;
        };
        let was_active = self.busy.swap(false, Ordering::SeqCst);
        job.handle.stop();
        if was_active {
            info!(execution_id = %job.execution_id, "Stopped following execution");
        }
        was_active
    }
}

/// The coordinator's busy flag, claimed for one submission. Released on
/// drop unless `keep` hands it to the polling job, so a failed or dropped
/// submission leaves the coordinator idle.
struct BusySlot<'a> {
    busy: &'a AtomicBool,
    kept: bool,
}

impl<'a> BusySlot<'a> {
    fn claim(busy: &'a AtomicBool) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { busy, kept: false })
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for BusySlot<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.busy.store(false, Ordering::SeqCst);
        }
    }
}

/// State moved into the poll callback of one job.
struct JobTracker {
    execution_id: String,
    mode: ExecutionMode,
    case_ids: Vec<String>,
    store: SharedCaseStore,
    observer: Arc<dyn ExecutionObserver>,
    state: Arc<JobState>,
    busy: Arc<AtomicBool>,
}

impl JobTracker {
    fn handle(&self, update: PollUpdate) {
        match update {
            PollUpdate::Progress(snapshot) => self.record_progress(&snapshot),
            PollUpdate::Finished(snapshot) => {
                self.record_progress(&snapshot);
                self.complete(snapshot);
            }
            PollUpdate::FetchFailed(err) => self.fail(err),
            PollUpdate::TimedOut { attempts } => self.fail(AppError::TimeoutError(format!(
                "Execution {} did not finish after {} status checks",
                self.execution_id, attempts
            ))),
        }
    }

    fn record_progress(&self, snapshot: &ExecutionSnapshot) {
        let view = ProgressView::from_snapshot(&self.execution_id, self.mode, snapshot);
        *self
            .state
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(view.clone());
        self.observer.on_progress(&view);
    }

    fn complete(&self, snapshot: ExecutionSnapshot) {
        let (matched, unmatched) = self.reconcile(&snapshot.results);
        let success_rate = success_rate(&snapshot);
        let report = CompletionReport {
            execution_id: self.execution_id.clone(),
            status: snapshot.status.clone(),
            total: snapshot.total_cases.max(snapshot.results.len()),
            succeeded: snapshot.successful_cases,
            failed: snapshot.failed_cases,
            success_rate,
            matched,
            unmatched,
            tier: OutcomeTier::from_success_rate(success_rate),
            error: snapshot.error.clone(),
        };
        info!(
            execution_id = %self.execution_id,
            status = %report.status,
            success_rate = report.success_rate,
            matched,
            unmatched,
            "Bulk execution finished"
        );

        *self
            .state
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        *self
            .state
            .report_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(self.execution_id.clone());
        self.busy.store(false, Ordering::SeqCst);
        self.observer.on_complete(&report);
    }

    fn fail(&self, err: AppError) {
        error!(execution_id = %self.execution_id, error = %err, "Lost track of bulk execution");
        self.busy.store(false, Ordering::SeqCst);
        self.observer.on_poll_error(&self.execution_id, &err);
    }

    /// Attaches each result to its case by `case_id`, or by `case_index`
    /// into the submitted subset when the id is missing. A result carrying
    /// neither falls back to its position, but only when the server sent
    /// exactly one result per submitted case.
    fn reconcile(&self, results: &[ExecutionResult]) -> (usize, usize) {
        let submitted: HashMap<&str, usize> = self
            .case_ids
            .iter()
            .enumerate()
            .map(|(index, id)| (id.as_str(), index))
            .collect();

        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let positional = results.len() == self.case_ids.len();
        let mut matched = 0;
        let mut unmatched = 0;
        let mut by_position = 0;
        for (position, result) in results.iter().enumerate() {
            let target = match (&result.case_id, result.case_index) {
                (Some(id), _) => submitted.get(id.as_str()).map(|_| id.as_str()),
                (None, Some(index)) => self.case_ids.get(index).map(String::as_str),
                (None, None) if positional => {
                    by_position += 1;
                    self.case_ids.get(position).map(String::as_str)
                }
                (None, None) => None,
            };
            let attached = match target {
                Some(id) => store.attach_result(id, result.to_case_result()).is_ok(),
                None => false,
            };
            if attached {
                matched += 1;
            } else {
                unmatched += 1;
                warn!(
                    execution_id = %self.execution_id,
                    case = %result.label(),
                    case_index = ?result.case_index,
                    "Result does not match any submitted case"
                );
            }
        }
        if by_position > 0 {
            warn!(
                execution_id = %self.execution_id,
                results = by_position,
                "Results without case_id or case_index matched by submission order"
            );
        }
        (matched, unmatched)
    }
}

fn success_rate(snapshot: &ExecutionSnapshot) -> f64 {
    if snapshot.total_cases > 0 {
        return snapshot.success_rate;
    }
    if snapshot.results.is_empty() {
        return 0.0;
    }
    let successes = snapshot.results.iter().filter(|result| result.success).count();
    successes as f64 * 100.0 / snapshot.results.len() as f64
}

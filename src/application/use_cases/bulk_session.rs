use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tracing::{info, warn};

use crate::application::use_cases::case_editor::CaseEditor;
use crate::application::use_cases::case_store::{BulkCaseStore, SharedCaseStore};
use crate::application::use_cases::execution_coordinator::{
    CompletionReport, ExecutionCoordinator, ExecutionObserver, ProgressView,
};
use crate::application::use_cases::notification_center::NotificationCenter;
use crate::domain::error::{AppError, Result};
use crate::domain::execution::{ExecutionMode, ExecutionOptions};
use crate::domain::notification::NotificationLevel;
use crate::domain::suite::SuiteRequest;
use crate::domain::test_case::{AnalysisSummary, DataMode, TestCase};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::qa_pilot::{QaPilotApi, SpreadsheetUpload};
use crate::infrastructure::storage::save_report;

/// Result of the last spreadsheet analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisState {
    pub file_name: String,
    pub summary: AnalysisSummary,
    pub analysis_type: Option<String>,
}

/// Turns job events into notifications and forwards them to an optional
/// extra observer, such as the CLI progress printer.
struct SessionObserver {
    notifications: NotificationCenter,
    forward: Option<Arc<dyn ExecutionObserver>>,
}

impl ExecutionObserver for SessionObserver {
    fn on_submitted(&self, execution_id: &str, mode: ExecutionMode, cases: usize) {
        self.notifications.info(
            "execution",
            &format!("Executing {} case(s) in {} mode ({}).", cases, mode, execution_id),
        );
        if let Some(forward) = &self.forward {
            forward.on_submitted(execution_id, mode, cases);
        }
    }

    fn on_progress(&self, view: &ProgressView) {
        if let Some(forward) = &self.forward {
            forward.on_progress(view);
        }
    }

    fn on_complete(&self, report: &CompletionReport) {
        let message = format!(
            "Execution finished: {} passed, {} failed ({:.1}% success).",
            report.succeeded, report.failed, report.success_rate
        );
        self.notifications
            .push(NotificationLevel::from(report.tier), "execution", &message);
        if report.unmatched > 0 {
            self.notifications.warning(
                "execution",
                &format!(
                    "{} result(s) could not be matched to a submitted case.",
                    report.unmatched
                ),
            );
        }
        if let Some(forward) = &self.forward {
            forward.on_complete(report);
        }
    }

    fn on_poll_error(&self, execution_id: &str, err: &AppError) {
        self.notifications.report_error("execution", err);
        if let Some(forward) = &self.forward {
            forward.on_poll_error(execution_id, err);
        }
    }
}

/// One bulk-upload workflow: the loaded batch, its execution and the
/// editor working on it. Every operation reports its own failure as a
/// single notification before returning the error.
pub struct BulkSession {
    api: Arc<dyn QaPilotApi>,
    store: SharedCaseStore,
    notifications: NotificationCenter,
    coordinator: ExecutionCoordinator,
    editor: CaseEditor,
    report_dir: PathBuf,
    analysis: Option<AnalysisState>,
}

impl BulkSession {
    pub fn new(
        api: Arc<dyn QaPilotApi>,
        config: &ClientConfig,
        forward: Option<Arc<dyn ExecutionObserver>>,
    ) -> Self {
        let store = BulkCaseStore::new().shared();
        let notifications = NotificationCenter::new(config.notification_ttl());
        let observer = Arc::new(SessionObserver {
            notifications: notifications.clone(),
            forward,
        });
        let coordinator = ExecutionCoordinator::new(
            Arc::clone(&api),
            Arc::clone(&store),
            observer,
            config.poll_settings(ExecutionMode::Sequential),
            config.poll_settings(ExecutionMode::Parallel),
        );
        let editor = CaseEditor::new(Arc::clone(&api), Arc::clone(&store), notifications.clone());
        Self {
            api,
            store,
            notifications,
            coordinator,
            editor,
            report_dir: config.report_dir.clone(),
            analysis: None,
        }
    }

    pub fn store(&self) -> &SharedCaseStore {
        &self.store
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    pub fn editor(&self) -> &CaseEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut CaseEditor {
        &mut self.editor
    }

    pub fn analysis(&self) -> Option<&AnalysisState> {
        self.analysis.as_ref()
    }

    /// Uploads the spreadsheet and replaces the batch with the analyzed
    /// cases.
    pub async fn analyze_upload(
        &mut self,
        path: Option<&Path>,
        data_mode: DataMode,
    ) -> Result<AnalysisSummary> {
        match self.try_analyze(path, data_mode).await {
            Ok(summary) => Ok(summary),
            Err(err) => self.fail("analyze", err),
        }
    }

    async fn try_analyze(&mut self, path: Option<&Path>, data_mode: DataMode) -> Result<AnalysisSummary> {
        let path = path.ok_or_else(|| {
            AppError::ValidationError("Select a spreadsheet file first.".to_string())
        })?;
        if self.coordinator.is_active() {
            return Err(AppError::ValidationError(
                "Wait for the running execution to finish before loading a new file.".to_string(),
            ));
        }
        let upload = SpreadsheetUpload::from_path(path)?;
        let file_name = upload.file_name.clone();

        let outcome = self.api.analyze_spreadsheet(upload, data_mode).await?;
        let loaded = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .load(outcome.test_cases);
        if !loaded {
            return Err(AppError::ApplicationError(
                "The spreadsheet does not contain any test cases.".to_string(),
            ));
        }
        self.editor.cancel();

        let summary = if outcome.summary.total_casos > 0 {
            outcome.summary
        } else {
            self.store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .summary()
        };
        self.notifications.success(
            "analyze",
            &format!(
                "Analysis complete: {} cases, {} valid, {} with problems.",
                summary.total_casos, summary.casos_validos, summary.casos_invalidos
            ),
        );
        self.analysis = Some(AnalysisState {
            file_name,
            summary: summary.clone(),
            analysis_type: outcome.analysis_type,
        });
        Ok(summary)
    }

    pub async fn execute_valid(
        &self,
        mode: ExecutionMode,
        options: ExecutionOptions,
    ) -> Result<String> {
        let cases: Vec<TestCase> = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .valid_cases()
            .cloned()
            .collect();
        if cases.is_empty() {
            return self.fail(
                "execution",
                AppError::ValidationError("There are no valid cases to execute.".to_string()),
            );
        }
        self.submit(cases, mode, options).await
    }

    /// Runs every case, including the ones flagged with problems.
    pub async fn execute_all(&self, mode: ExecutionMode, options: ExecutionOptions) -> Result<String> {
        let cases: Vec<TestCase> = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .all_cases()
            .cloned()
            .collect();
        if cases.is_empty() {
            return self.fail(
                "execution",
                AppError::ValidationError("Load a spreadsheet first.".to_string()),
            );
        }
        self.submit(cases, mode, options).await
    }

    pub async fn execute_single(&self, case_id: &str, options: ExecutionOptions) -> Result<String> {
        match self.try_execute_single(case_id, options).await {
            Ok(execution_id) => Ok(execution_id),
            Err(err) => self.fail("execution", err),
        }
    }

    async fn try_execute_single(&self, case_id: &str, options: ExecutionOptions) -> Result<String> {
        let case = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(case_id)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("Case '{}' is not in the current batch", case_id))
            })?;

        match self.api.check_case_status(case_id).await {
            Ok(status) if status.is_running => {
                return Err(AppError::ValidationError(format!(
                    "Case '{}' is already running ({}).",
                    case.display_name(),
                    status.execution_id.as_deref().unwrap_or("unknown execution")
                )));
            }
            Ok(_) => {}
            Err(err) => {
                warn!(case_id = %case_id, error = %err, "Could not check case status, executing anyway");
            }
        }
        self.coordinator.execute_single(case, options).await
    }

    async fn submit(
        &self,
        cases: Vec<TestCase>,
        mode: ExecutionMode,
        options: ExecutionOptions,
    ) -> Result<String> {
        match self.coordinator.submit(cases, mode, options).await {
            Ok(execution_id) => Ok(execution_id),
            Err(err) => self.fail("execution", err),
        }
    }

    /// Waits for the current job. Polling failures were already reported
    /// by the observer.
    pub async fn wait_for_execution(&self) -> Result<CompletionReport> {
        self.coordinator.wait().await
    }

    pub fn cancel_execution(&self) -> bool {
        let cancelled = self.coordinator.cancel();
        if cancelled {
            self.notifications
                .warning("execution", "Stopped following the running execution.");
        }
        cancelled
    }

    /// Saves the batch as a reusable suite. Invalid cases are only
    /// included on request.
    pub async fn save_as_suite(
        &self,
        name: &str,
        description: &str,
        include_invalid: bool,
    ) -> Result<usize> {
        let cases: Vec<TestCase> = {
            let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            if include_invalid {
                store.all_cases().cloned().collect()
            } else {
                store.valid_cases().cloned().collect()
            }
        };
        let request = SuiteRequest::new(name, description, cases, include_invalid);
        if let Err(err) = request.check() {
            return self.fail("suite", err);
        }
        if let Err(err) = self.api.save_suite(&request).await {
            return self.fail("suite", err);
        }

        let saved = request.test_cases.len();
        info!(suite = %request.suite_name, cases = saved, "Saved cases as suite");
        self.notifications.success(
            "suite",
            &format!("Suite '{}' saved with {} case(s).", request.suite_name, saved),
        );
        Ok(saved)
    }

    /// Downloads the report of the last finished job.
    pub async fn download_report(&self, out_dir: Option<&Path>) -> Result<PathBuf> {
        let Some(execution_id) = self.coordinator.report_ready() else {
            return self.fail(
                "report",
                AppError::ValidationError(
                    "There is no finished execution to report on.".to_string(),
                ),
            );
        };
        self.download_report_for(&execution_id, out_dir).await
    }

    pub async fn download_report_for(
        &self,
        execution_id: &str,
        out_dir: Option<&Path>,
    ) -> Result<PathBuf> {
        let document = match self.api.generate_report(execution_id).await {
            Ok(document) => document,
            Err(err) => return self.fail("report", err),
        };
        let dir = out_dir.unwrap_or(self.report_dir.as_path());
        let path = match save_report(dir, &document, Utc::now()) {
            Ok(path) => path,
            Err(err) => return self.fail("report", AppError::from(err)),
        };
        info!(execution_id = %execution_id, path = %path.display(), bytes = document.bytes.len(), "Report saved");
        self.notifications
            .success("report", &format!("Report saved to {}.", path.display()));
        Ok(path)
    }

    fn fail<T>(&self, source: &str, err: AppError) -> Result<T> {
        self.notifications.report_error(source, &err);
        Err(err)
    }
}

//! In-memory stand-in for the QA Pilot server used by the use-case tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::error::{AppError, Result};
use crate::domain::execution::{
    CaseRunStatus, ExecutionMode, ExecutionOptions, ExecutionResult, ExecutionSnapshot, JobStatus,
};
use crate::domain::suite::SuiteRequest;
use crate::domain::test_case::{DataMode, TestCase};
use crate::infrastructure::qa_pilot::{
    AnalysisOutcome, QaPilotApi, ReportDocument, SpreadsheetUpload,
};

pub struct FakeApi {
    pub analysis: Mutex<Option<Result<AnalysisOutcome>>>,
    pub submit_result: Mutex<Result<String>>,
    /// Holds the submission response back for this long.
    pub submit_delay: Mutex<Option<Duration>>,
    pub submitted: Mutex<Vec<(Vec<TestCase>, ExecutionMode, ExecutionOptions)>>,
    pub statuses: Mutex<VecDeque<Result<ExecutionSnapshot>>>,
    pub status_calls: AtomicUsize,
    pub reanalysis: Mutex<Option<Result<TestCase>>>,
    pub reanalyzed: Mutex<Vec<TestCase>>,
    pub saved_suites: Mutex<Vec<String>>,
    pub report: Mutex<Option<Result<ReportDocument>>>,
    pub report_calls: AtomicUsize,
    pub case_status: Mutex<CaseRunStatus>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            analysis: Mutex::new(None),
            submit_result: Mutex::new(Ok("exec-1".to_string())),
            submit_delay: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            statuses: Mutex::new(VecDeque::new()),
            status_calls: AtomicUsize::new(0),
            reanalysis: Mutex::new(None),
            reanalyzed: Mutex::new(Vec::new()),
            saved_suites: Mutex::new(Vec::new()),
            report: Mutex::new(None),
            report_calls: AtomicUsize::new(0),
            case_status: Mutex::new(CaseRunStatus::default()),
        }
    }
}

impl FakeApi {
    pub fn with_statuses(statuses: Vec<Result<ExecutionSnapshot>>) -> Self {
        let api = Self::default();
        *api.statuses.lock().unwrap() = statuses.into();
        api
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl QaPilotApi for FakeApi {
    async fn analyze_spreadsheet(
        &self,
        _upload: SpreadsheetUpload,
        _data_mode: DataMode,
    ) -> Result<AnalysisOutcome> {
        self.analysis
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(AppError::Internal("no analysis scripted".to_string())))
    }

    async fn execute_bulk_cases(
        &self,
        cases: &[TestCase],
        mode: ExecutionMode,
        options: ExecutionOptions,
    ) -> Result<String> {
        self.submitted
            .lock()
            .unwrap()
            .push((cases.to_vec(), mode, options));
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.submit_result.lock().unwrap().clone()
    }

    async fn execution_status(&self, _execution_id: &str) -> Result<ExecutionSnapshot> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(snapshot("en_progreso", 50.0)))
    }

    async fn reanalyze_case(&self, case: &TestCase) -> Result<TestCase> {
        self.reanalyzed.lock().unwrap().push(case.clone());
        self.reanalysis
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(AppError::Internal("no reanalysis scripted".to_string())))
    }

    async fn save_suite(&self, request: &SuiteRequest) -> Result<()> {
        self.saved_suites
            .lock()
            .unwrap()
            .push(request.suite_name.clone());
        Ok(())
    }

    async fn generate_report(&self, _execution_id: &str) -> Result<ReportDocument> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        self.report
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(AppError::Internal("no report scripted".to_string())))
    }

    async fn check_case_status(&self, _case_id: &str) -> Result<CaseRunStatus> {
        Ok(self.case_status.lock().unwrap().clone())
    }
}

pub fn snapshot(status: &str, progress: f64) -> ExecutionSnapshot {
    ExecutionSnapshot {
        status: JobStatus::from(status),
        progress,
        ..Default::default()
    }
}

pub fn result_for(case_id: &str, success: bool) -> ExecutionResult {
    ExecutionResult {
        case_id: Some(case_id.to_string()),
        status: if success { "completado" } else { "fallido" }.to_string(),
        success,
        message: if success { "OK" } else { "Assertion failed" }.to_string(),
        execution_time: Some(12.5),
        ..Default::default()
    }
}

pub fn finished(results: Vec<ExecutionResult>) -> ExecutionSnapshot {
    let successful = results.iter().filter(|result| result.success).count();
    let total = results.len();
    ExecutionSnapshot {
        status: JobStatus::Completado,
        progress: 100.0,
        total_cases: total,
        completed_cases: total,
        successful_cases: successful,
        failed_cases: total - successful,
        success_rate: if total == 0 {
            0.0
        } else {
            successful as f64 * 100.0 / total as f64
        },
        results,
        ..Default::default()
    }
}

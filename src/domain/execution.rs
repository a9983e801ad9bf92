use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::test_case::CaseExecutionResult;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options sent alongside the cases when a batch is submitted.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub show_browser: bool,
}

/// Timing and budget for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay before the first fetch, so the poll does not race job creation.
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            interval: Duration::from_millis(2000),
            max_attempts: 100,
        }
    }
}

/// Server-side job status.
///
/// Only `iniciado` and `en_progreso` mean the job is still running; every
/// other value, including ones this client does not know, is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Iniciado,
    EnProgreso,
    Completado,
    Fallido,
    Other(String),
}

impl JobStatus {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, JobStatus::Iniciado | JobStatus::EnProgreso)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Iniciado => "iniciado",
            JobStatus::EnProgreso => "en_progreso",
            JobStatus::Completado => "completado",
            JobStatus::Fallido => "fallido",
            JobStatus::Other(value) => value,
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Iniciado
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "iniciado" => JobStatus::Iniciado,
            "en_progreso" => JobStatus::EnProgreso,
            "completado" => JobStatus::Completado,
            "fallido" => JobStatus::Fallido,
            _ => JobStatus::Other(value),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(value: &str) -> Self {
        JobStatus::from(value.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-case entry of a job's result list.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub case_index: Option<usize>,
    #[serde(default)]
    pub case_name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub screenshots_count: Option<u32>,
    #[serde(default)]
    pub completed_at: Option<String>,
    /// Sent by sequential runs.
    #[serde(default)]
    pub url: Option<String>,
    /// Sent by browser-driven runs in place of `url`.
    #[serde(default)]
    pub url_tested: Option<String>,
}

impl ExecutionResult {
    /// The subset of fields kept on the case after reconciliation.
    pub fn to_case_result(&self) -> CaseExecutionResult {
        CaseExecutionResult {
            status: self.status.clone(),
            success: self.success,
            message: self.message.clone(),
            execution_time: self.execution_time,
            screenshots_count: self.screenshots_count,
            completed_at: self.completed_at.clone(),
        }
    }

    pub fn tested_url(&self) -> Option<&str> {
        self.url_tested.as_deref().or(self.url.as_deref())
    }

    pub fn label(&self) -> String {
        self.case_name
            .clone()
            .or_else(|| self.case_id.clone())
            .unwrap_or_else(|| "unnamed case".to_string())
    }
}

/// Read-only mirror of the server's job record, as returned by one poll.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ExecutionSnapshot {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub total_cases: usize,
    #[serde(default)]
    pub completed_cases: usize,
    #[serde(default)]
    pub successful_cases: usize,
    #[serde(default)]
    pub failed_cases: usize,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub current_case_name: Option<String>,
    #[serde(default)]
    pub current_case_progress: Option<f64>,
    #[serde(default)]
    pub current_step_description: Option<String>,
    #[serde(default)]
    pub results: Vec<ExecutionResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Answer of the per-case "is it running" lookup.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CaseRunStatus {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub current_status: Option<String>,
    #[serde(default)]
    pub progress: f64,
}

/// Completion tiers used for the final notification and the renderer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeTier {
    Success,
    Warning,
    Danger,
}

impl OutcomeTier {
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 80.0 {
            OutcomeTier::Success
        } else if rate >= 50.0 {
            OutcomeTier::Warning
        } else {
            OutcomeTier::Danger
        }
    }
}

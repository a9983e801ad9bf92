//! View descriptions of the batch, built fresh from the store on every call.

use serde::Serialize;
use std::fmt::Write as _;

use crate::application::use_cases::case_store::BulkCaseStore;
use crate::application::use_cases::execution_coordinator::{CurrentCase, FinishedCase, ProgressView};
use crate::domain::test_case::{AnalysisSummary, TestCase};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaseTab {
    Valid,
    Invalid,
    #[default]
    All,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultBadge {
    pub success: bool,
    pub label: &'static str,
    /// Rounded to whole seconds.
    pub seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CaseRow {
    pub id: String,
    pub name: String,
    pub valid: bool,
    pub url: Option<String>,
    pub result: Option<ResultBadge>,
    pub problems: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressPanel {
    pub percentage: f64,
    pub label: String,
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub current_case: Option<CurrentCase>,
    pub results: Vec<FinishedCase>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionState {
    pub can_execute_valid: bool,
    pub can_execute_all: bool,
    pub can_edit_problematic: bool,
    pub can_download_report: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchView {
    pub stats: AnalysisSummary,
    pub tab: CaseTab,
    pub cases: Vec<CaseRow>,
    pub empty_message: Option<&'static str>,
    pub progress: Option<ProgressPanel>,
    pub actions: ActionState,
}

pub fn render(
    store: &BulkCaseStore,
    progress: Option<&ProgressView>,
    tab: CaseTab,
    report_ready: bool,
) -> BatchView {
    let stats = store.summary();
    let cases: Vec<CaseRow> = match tab {
        CaseTab::Valid => store.valid_cases().map(case_row).collect(),
        CaseTab::Invalid => store.invalid_cases().map(case_row).collect(),
        CaseTab::All => store.all_cases().map(case_row).collect(),
    };
    let empty_message = match (cases.is_empty(), tab) {
        (false, _) => None,
        (true, CaseTab::Valid) => Some("No valid cases found to execute."),
        (true, CaseTab::Invalid) => Some("All cases are valid."),
        (true, CaseTab::All) => Some("No cases loaded. Analyze a spreadsheet first."),
    };
    let running = progress.is_some_and(|view| view.status.is_in_progress());

    BatchView {
        actions: ActionState {
            can_execute_valid: !running && stats.casos_validos > 0,
            can_execute_all: !running && stats.total_casos > 0,
            can_edit_problematic: stats.casos_invalidos > 0,
            can_download_report: !running && report_ready,
        },
        stats,
        tab,
        cases,
        empty_message,
        progress: progress.map(progress_panel),
    }
}

fn case_row(case: &TestCase) -> CaseRow {
    CaseRow {
        id: case.id.clone(),
        name: case.display_name().to_string(),
        valid: case.es_valido,
        url: case.url_extraida.clone(),
        result: case.execution_result.as_ref().map(|result| ResultBadge {
            success: result.success,
            label: if result.success { "passed" } else { "failed" },
            seconds: result
                .execution_time
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(|secs| secs.round() as u64),
        }),
        problems: case.problemas.clone(),
        suggestions: case.sugerencias.clone(),
    }
}

fn progress_panel(view: &ProgressView) -> ProgressPanel {
    ProgressPanel {
        percentage: view.percentage,
        label: format!("{:.0}% ({})", view.percentage, view.status),
        completed: view.completed,
        total: view.total,
        succeeded: view.succeeded,
        failed: view.failed,
        current_case: view.current_case.clone(),
        results: view.results.clone(),
    }
}

/// One status line for a poll, as printed while a job runs.
pub fn progress_line(view: &ProgressView) -> String {
    let mut line = format!(
        "[{}] {:>3.0}% {}/{} done, {} passed, {} failed",
        view.execution_id, view.percentage, view.completed, view.total, view.succeeded, view.failed
    );
    if let Some(current) = &view.current_case {
        let _ = write!(line, " | {} {:.0}%", current.name, current.progress);
        if let Some(step) = &current.step {
            let _ = write!(line, ": {}", step);
        }
    }
    line
}

/// One finished case of a running job.
pub fn result_line(result: &FinishedCase) -> String {
    let mut line = format!(
        "  {} {}: {}",
        if result.success { "passed" } else { "failed" },
        result.name,
        if result.message.is_empty() { "no message" } else { result.message.as_str() }
    );
    if let Some(seconds) = result.execution_time {
        let _ = write!(line, " ({}s)", seconds);
    }
    if let Some(url) = &result.url {
        let _ = write!(line, " <{}>", url);
    }
    line
}

pub fn to_text(view: &BatchView) -> String {
    let mut out = String::new();
    let stats = &view.stats;
    let _ = writeln!(
        out,
        "Cases: {} total, {} valid, {} with problems ({}% valid)",
        stats.total_casos, stats.casos_validos, stats.casos_invalidos, stats.porcentaje_validos
    );
    if let Some(progress) = &view.progress {
        let _ = writeln!(
            out,
            "Execution: {}, {}/{} done, {} passed, {} failed",
            progress.label, progress.completed, progress.total, progress.succeeded, progress.failed
        );
        for result in &progress.results {
            let _ = writeln!(out, "{}", result_line(result));
        }
    }
    if let Some(message) = view.empty_message {
        let _ = writeln!(out, "{}", message);
    }
    for row in &view.cases {
        let marker = if row.valid { "OK " } else { "!! " };
        let _ = write!(out, "{}{} {}", marker, row.id, row.name);
        if let Some(url) = &row.url {
            let _ = write!(out, " <{}>", url);
        }
        if let Some(result) = &row.result {
            let _ = write!(out, " [{}", result.label);
            if let Some(seconds) = result.seconds {
                let _ = write!(out, " {}s", seconds);
            }
            out.push(']');
        }
        out.push('\n');
        for problem in &row.problems {
            let _ = writeln!(out, "    problem: {}", problem);
        }
        for suggestion in &row.suggestions {
            let _ = writeln!(out, "    suggestion: {}", suggestion);
        }
    }
    out
}

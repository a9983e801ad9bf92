use async_trait::async_trait;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::domain::error::{AppError, Result};
use crate::domain::execution::{
    CaseRunStatus, ExecutionMode, ExecutionOptions, ExecutionSnapshot,
};
use crate::domain::suite::SuiteRequest;
use crate::domain::test_case::{AnalysisSummary, DataMode, TestCase};
use crate::infrastructure::response::{
    attachment_filename, read_envelope, server_error_message, status_error, take_field,
};

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Spreadsheet bytes ready to be uploaded for analysis.
#[derive(Debug, Clone)]
pub struct SpreadsheetUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl SpreadsheetUpload {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(AppError::ValidationError(format!(
                "Spreadsheet not found: {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "casos.xlsx".to_string());
        Ok(Self { file_name, bytes })
    }

    fn mime_type(&self) -> &'static str {
        let lower = self.file_name.to_lowercase();
        if lower.ends_with(".xlsx") {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        } else if lower.ends_with(".xls") {
            "application/vnd.ms-excel"
        } else if lower.ends_with(".csv") {
            "text/csv"
        } else {
            "application/octet-stream"
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub test_cases: Vec<TestCase>,
    pub summary: AnalysisSummary,
    /// `ia` when the server used its AI analyzer, `basico` otherwise.
    pub analysis_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReportDocument {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Every endpoint of the QA Pilot server this client consumes.
#[async_trait]
pub trait QaPilotApi: Send + Sync {
    async fn analyze_spreadsheet(
        &self,
        upload: SpreadsheetUpload,
        data_mode: DataMode,
    ) -> Result<AnalysisOutcome>;

    /// Returns the server-assigned execution id.
    async fn execute_bulk_cases(
        &self,
        cases: &[TestCase],
        mode: ExecutionMode,
        options: ExecutionOptions,
    ) -> Result<String>;

    async fn execution_status(&self, execution_id: &str) -> Result<ExecutionSnapshot>;

    async fn reanalyze_case(&self, case: &TestCase) -> Result<TestCase>;

    async fn save_suite(&self, request: &SuiteRequest) -> Result<()>;

    async fn generate_report(&self, execution_id: &str) -> Result<ReportDocument>;

    async fn check_case_status(&self, case_id: &str) -> Result<CaseRunStatus>;
}

pub struct HttpQaPilotClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpQaPilotClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url.trim()).map_err(|e| {
            AppError::ConfigError(format!("Invalid server URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::ConfigError(format!(
                "Server URL cannot be used as a base: {}",
                base_url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::ConfigError("Server URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send_error(context: &str, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::NetworkError(format!("{}: request timed out", context))
        } else {
            AppError::NetworkError(format!("{}: request failed: {}", context, err))
        }
    }
}

#[async_trait]
impl QaPilotApi for HttpQaPilotClient {
    async fn analyze_spreadsheet(
        &self,
        upload: SpreadsheetUpload,
        data_mode: DataMode,
    ) -> Result<AnalysisOutcome> {
        const CONTEXT: &str = "Spreadsheet analysis";
        let url = self.endpoint(&["api", "analyze_excel"])?;
        info!(
            file = %upload.file_name,
            bytes = upload.bytes.len(),
            data_mode = data_mode.as_str(),
            "Uploading spreadsheet for analysis"
        );

        let mime = upload.mime_type();
        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(mime)
            .map_err(|e| AppError::Internal(format!("Invalid upload content type: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("data_mode", data_mode.as_str());

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::send_error(CONTEXT, e))?;
        let mut body = read_envelope(CONTEXT, response).await?;

        let test_cases: Vec<TestCase> = take_field(CONTEXT, &mut body, "test_cases")?;
        let summary = take_field::<AnalysisSummary>(CONTEXT, &mut body, "summary")
            .unwrap_or_else(|_| AnalysisSummary::from_cases(&test_cases));
        let analysis_type = body
            .get("analysis_type")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());

        Ok(AnalysisOutcome {
            test_cases,
            summary,
            analysis_type,
        })
    }

    async fn execute_bulk_cases(
        &self,
        cases: &[TestCase],
        mode: ExecutionMode,
        options: ExecutionOptions,
    ) -> Result<String> {
        const CONTEXT: &str = "Bulk execution";
        let url = self.endpoint(&["api", "execute_bulk_cases"])?;
        let cases_json = serde_json::to_string(cases)?;
        debug!(
            cases = cases.len(),
            mode = mode.as_str(),
            show_browser = options.show_browser,
            "Submitting bulk execution"
        );

        let form = Form::new()
            .text("test_cases_json", cases_json)
            .text("execution_mode", mode.as_str())
            .text("show_browser", options.show_browser.to_string());

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::send_error(CONTEXT, e))?;
        let mut body = read_envelope(CONTEXT, response).await?;
        let execution_id: String = take_field(CONTEXT, &mut body, "execution_id")?;
        if execution_id.trim().is_empty() {
            return Err(AppError::ParseError(format!(
                "{}: empty execution_id",
                CONTEXT
            )));
        }
        Ok(execution_id)
    }

    async fn execution_status(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        const CONTEXT: &str = "Execution status";
        let url = self.endpoint(&["api", "execution_status", execution_id])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::send_error(CONTEXT, e))?;
        let mut body = read_envelope(CONTEXT, response).await?;
        take_field(CONTEXT, &mut body, "execution")
    }

    async fn reanalyze_case(&self, case: &TestCase) -> Result<TestCase> {
        const CONTEXT: &str = "Case re-analysis";
        let url = self.endpoint(&["api", "reanalyze_case"])?;
        let response = self
            .client
            .post(url)
            .json(&json!({ "test_case": case }))
            .send()
            .await
            .map_err(|e| Self::send_error(CONTEXT, e))?;
        let mut body = read_envelope(CONTEXT, response).await?;
        take_field(CONTEXT, &mut body, "analyzed_case")
    }

    async fn save_suite(&self, request: &SuiteRequest) -> Result<()> {
        const CONTEXT: &str = "Save suite";
        let url = self.endpoint(&["api", "save_excel_as_suite"])?;
        info!(
            suite = %request.suite_name,
            cases = request.test_cases.len(),
            include_invalid = request.include_invalid,
            "Saving cases as suite"
        );
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::send_error(CONTEXT, e))?;
        read_envelope(CONTEXT, response).await?;
        Ok(())
    }

    async fn generate_report(&self, execution_id: &str) -> Result<ReportDocument> {
        const CONTEXT: &str = "Report generation";
        let url = self.endpoint(&["api", "generate_bulk_word_report", execution_id])?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| Self::send_error(CONTEXT, e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(attachment_filename);

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(CONTEXT, status, &text));
        }

        if content_type.contains(DOCX_CONTENT_TYPE) {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| AppError::NetworkError(format!("{}: {}", CONTEXT, e)))?;
            return Ok(ReportDocument {
                file_name,
                bytes: bytes.to_vec(),
            });
        }

        // Anything other than the document is a JSON error payload.
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str(&text)
            .ok()
            .and_then(|body| server_error_message(&body))
            .unwrap_or_else(|| "server did not return a report document".to_string());
        Err(AppError::ApplicationError(format!("{}: {}", CONTEXT, message)))
    }

    async fn check_case_status(&self, case_id: &str) -> Result<CaseRunStatus> {
        const CONTEXT: &str = "Case status";
        let url = self.endpoint(&["api", "check_case_status", case_id])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::send_error(CONTEXT, e))?;
        let body = read_envelope(CONTEXT, response).await?;
        serde_json::from_value(body)
            .map_err(|e| AppError::ParseError(format!("{}: {}", CONTEXT, e)))
    }
}

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::domain::error::{AppError, Result};

static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).unwrap()
});

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).unwrap());

/// Pulls the human readable error out of a server JSON body. The server
/// uses `error` on most endpoints and `message` on the report endpoint.
pub fn server_error_message(body: &JsonValue) -> Option<String> {
    ["error", "message"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(|value| value.as_str()))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Error for a non-2xx answer. The body is only used for its message.
pub fn status_error(context: &str, status: StatusCode, body: &str) -> AppError {
    let detail = serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|json| server_error_message(&json))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        });
    AppError::NetworkError(format!("{} failed ({}): {}", context, status.as_u16(), detail))
}

/// Checks the `{success: bool, ...}` envelope every JSON endpoint returns.
pub fn check_envelope(context: &str, body: JsonValue) -> Result<JsonValue> {
    match body.get("success").and_then(|value| value.as_bool()) {
        Some(true) => Ok(body),
        Some(false) => Err(AppError::ApplicationError(format!(
            "{}: {}",
            context,
            server_error_message(&body).unwrap_or_else(|| "unknown server error".to_string())
        ))),
        None => Err(AppError::ParseError(format!(
            "{}: response has no success flag",
            context
        ))),
    }
}

/// Reads a JSON response, mapping HTTP and envelope failures.
pub async fn read_envelope(context: &str, response: reqwest::Response) -> Result<JsonValue> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| AppError::NetworkError(format!("{}: failed to read body: {}", context, e)))?;

    if !status.is_success() {
        return Err(status_error(context, status, &text));
    }

    let body: JsonValue = serde_json::from_str(&text)
        .map_err(|e| AppError::ParseError(format!("{}: invalid JSON: {}", context, e)))?;
    check_envelope(context, body)
}

/// Deserializes one field of an already checked envelope.
pub fn take_field<T: DeserializeOwned>(context: &str, body: &mut JsonValue, field: &str) -> Result<T> {
    let value = body
        .get_mut(field)
        .map(JsonValue::take)
        .filter(|value| !value.is_null())
        .ok_or_else(|| AppError::ParseError(format!("{}: missing '{}'", context, field)))?;
    serde_json::from_value(value)
        .map_err(|e| AppError::ParseError(format!("{}: invalid '{}': {}", context, field, e)))
}

/// File name announced in a `Content-Disposition` header, stripped of
/// anything that could escape the target directory.
pub fn attachment_filename(header: &str) -> Option<String> {
    let raw = FILENAME_PATTERN
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())?;
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(&raw, "_").trim_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_success() {
        let body = check_envelope("analyze", json!({"success": true, "test_cases": []})).unwrap();
        assert!(body["test_cases"].is_array());
    }

    #[test]
    fn test_envelope_failure_uses_server_error() {
        let err = check_envelope("analyze", json!({"success": false, "error": "Archivo vacío"}))
            .unwrap_err();
        assert_eq!(err, AppError::ApplicationError("analyze: Archivo vacío".to_string()));
    }

    #[test]
    fn test_envelope_without_flag_is_parse_error() {
        let err = check_envelope("status", json!({"execution": {}})).unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }

    #[test]
    fn test_status_error_prefers_json_message() {
        let err = status_error(
            "execution status",
            StatusCode::NOT_FOUND,
            r#"{"success": false, "error": "Ejecución no encontrada"}"#,
        );
        assert_eq!(
            err,
            AppError::NetworkError(
                "execution status failed (404): Ejecución no encontrada".to_string()
            )
        );
    }

    #[test]
    fn test_status_error_falls_back_to_reason() {
        let err = status_error("report", StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(
            err,
            AppError::NetworkError("report failed (502): Bad Gateway".to_string())
        );
    }

    #[test]
    fn test_take_field_missing() {
        let mut body = json!({"success": true});
        let err = take_field::<String>("submit", &mut body, "execution_id").unwrap_err();
        assert!(matches!(err, AppError::ParseError(msg) if msg.contains("execution_id")));
    }

    #[test]
    fn test_attachment_filename() {
        assert_eq!(
            attachment_filename(r#"attachment; filename="Reporte_Masivo.docx""#),
            Some("Reporte_Masivo.docx".to_string())
        );
        assert_eq!(
            attachment_filename("attachment; filename*=UTF-8''reporte.docx"),
            Some("reporte.docx".to_string())
        );
        assert_eq!(
            attachment_filename(r#"attachment; filename="../../etc/passwd""#),
            Some("_.._etc_passwd".to_string())
        );
        assert_eq!(attachment_filename("inline"), None);
    }
}

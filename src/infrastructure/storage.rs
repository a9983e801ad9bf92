use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::infrastructure::qa_pilot::ReportDocument;

pub const REPORT_FILE_PREFIX: &str = "Reporte_Ejecucion_Masiva";

pub fn ensure_report_dir(report_dir: &Path) -> std::io::Result<PathBuf> {
    ensure_dir(report_dir)?;
    Ok(report_dir.to_path_buf())
}

/// `Reporte_Ejecucion_Masiva_2024-05-01_14-30.docx`, stamped in UTC.
pub fn default_report_name<Tz: TimeZone>(now: DateTime<Tz>) -> String {
    format!(
        "{}_{}.docx",
        REPORT_FILE_PREFIX,
        now.with_timezone(&Utc).format("%Y-%m-%d_%H-%M")
    )
}

/// Writes the report under `report_dir`, preferring the server's file name.
pub fn save_report(
    report_dir: &Path,
    document: &ReportDocument,
    now: DateTime<Utc>,
) -> std::io::Result<PathBuf> {
    let dir = ensure_report_dir(report_dir)?;
    let file_name = document
        .file_name
        .clone()
        .unwrap_or_else(|| default_report_name(now));
    let path = dir.join(file_name);
    fs::write(&path, &document.bytes)?;
    Ok(path)
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

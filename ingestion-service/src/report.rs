use readings_client::domain::MeterReading;
use serde::Serialize;

use crate::pipeline::{FileKind, IngestionResult, ParseError};

/// Checklist shown to an uploader whose file could not be parsed.
pub const UPLOAD_HINTS: &[&str] = &[
    "file format is supported (PDF, CSV, TXT, JSON)",
    "file contains a meter number (METERNO)",
    "file contains valid readings with dates",
    "file is not corrupted or password protected",
    "CSV files have proper headers (METERNO, readdttm, read)",
];

/// Rendering of an [`IngestionResult`] for operators, with the saved
/// readings trimmed to a preview.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub file_kind: FileKind,
    pub meter_number: String,
    pub total_extracted: usize,
    pub new_saved: usize,
    pub duplicates_skipped: usize,
    pub skipped_null_readings: usize,
    pub persistence_failures: usize,
    pub source_digest: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub saved_from: Option<time::OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub saved_to: Option<time::OffsetDateTime>,
    pub saved_readings: Vec<MeterReading>,
    /// Saved readings left out of `saved_readings`.
    pub more_saved: usize,
    pub message: String,
}

impl IngestionSummary {
    pub fn new(result: &IngestionResult, preview_limit: usize) -> Self {
        let range = result.saved_date_range();
        let preview: Vec<MeterReading> = result
            .saved_readings
            .iter()
            .take(preview_limit)
            .cloned()
            .collect();

        let message = if result.persistence_failures > 0 {
            format!(
                "{} reading(s) could not be saved; re-upload the file to retry them",
                result.persistence_failures
            )
        } else if result.new_saved > 0 {
            "database updated".to_string()
        } else {
            "no new readings to save; all readings already exist".to_string()
        };

        Self {
            file_kind: result.file_kind,
            meter_number: result.meter_number.clone(),
            total_extracted: result.total_extracted,
            new_saved: result.new_saved,
            duplicates_skipped: result.duplicates_skipped,
            skipped_null_readings: result.skipped_null_readings,
            persistence_failures: result.persistence_failures,
            source_digest: result.source_digest.clone(),
            saved_from: range.map(|(from, _)| from),
            saved_to: range.map(|(_, to)| to),
            more_saved: result.saved_readings.len() - preview.len(),
            saved_readings: preview,
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub hints: &'static [&'static str],
}

impl FailureReport {
    pub fn parse(err: &ParseError, file_name: Option<String>) -> Self {
        Self {
            error: err.to_string(),
            file_name,
            hints: UPLOAD_HINTS,
        }
    }

    pub fn other(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
            file_name: None,
            hints: &[],
        }
    }
}

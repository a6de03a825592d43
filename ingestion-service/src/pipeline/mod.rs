mod meter_locks;

use std::{collections::HashSet, fmt, str::FromStr, sync::Arc};

use readings_client::domain::{MeterReading, NewMeterReading};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    sinks::{DeduplicationStore, ReadingStore, StoreError},
    sources::{self, PdfTextExtractor},
    transform::ReadingNormalizer,
};

pub use meter_locks::MeterLocks;

/// Declared format of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Pdf,
    Json,
}

impl FileKind {
    /// Resolve the kind from an uploaded file name's extension.
    pub fn from_file_name(file_name: &str) -> Result<Self, ParseError> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" | "txt" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            "json" => Ok(Self::Json),
            _ => Err(ParseError::UnsupportedFileKind(file_name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::Json => "json",
        }
    }
}

impl FromStr for FileKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" | "txt" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            "json" => Ok(Self::Json),
            other => Err(ParseError::UnsupportedFileKind(other.to_string())),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure for a whole file. Nothing is persisted.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unsupported file format '{0}' (supported: PDF, CSV/TXT, JSON)")]
    UnsupportedFileKind(String),
    #[error("no meter number found (expected a METERNO column or a 'Meter No' field)")]
    MissingMeterNumber,
    #[error(
        "file contains readings for more than one meter ({}); upload one meter per file",
        .0.join(", ")
    )]
    MixedMeterNumbers(Vec<String>),
    #[error("missing required column: {0}")]
    MissingColumns(String),
    #[error("no valid readings found in file")]
    NoReadings,
    #[error("file could not be read: {0}")]
    Unreadable(String),
    #[error("PDF text extraction failed: {0}")]
    PdfExtraction(String),
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A parsed and normalized file, ready to be persisted.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub file_kind: FileKind,
    pub meter_number: String,
    /// Distinct-date readings in file order.
    pub readings: Vec<NewMeterReading>,
    /// Later rows repeating a reading date already seen in the same file.
    pub in_batch_duplicates: usize,
    pub skipped_null_readings: usize,
    pub source_digest: String,
}

/// Outcome of one ingestion, returned to the delivery layer for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub file_kind: FileKind,
    pub meter_number: String,
    pub total_extracted: usize,
    pub new_saved: usize,
    pub duplicates_skipped: usize,
    pub skipped_null_readings: usize,
    pub persistence_failures: usize,
    pub source_digest: String,
    pub saved_readings: Vec<MeterReading>,
}

impl IngestionResult {
    /// Earliest and latest reading date among the newly saved rows.
    pub fn saved_date_range(&self) -> Option<(OffsetDateTime, OffsetDateTime)> {
        let first = self.saved_readings.first()?.reading_date;
        Some(self.saved_readings.iter().fold((first, first), |(lo, hi), r| {
            (lo.min(r.reading_date), hi.max(r.reading_date))
        }))
    }
}

/// parse -> normalize -> dedup-persist, one file per call.
///
/// The pipeline keeps no state between calls. Two concurrent calls for the
/// same meter can both read the existing dates before either inserts; callers
/// that accept concurrent uploads must serialize per meter (see
/// [`MeterLocks`]). The unique index on `(meter_no, reading_date)` turns a lost
/// race into a reported duplicate rather than a second row.
pub struct IngestionPipeline<S> {
    store: DeduplicationStore<S>,
    normalizer: ReadingNormalizer,
    pdf_extractor: Arc<dyn PdfTextExtractor>,
}

impl<S: ReadingStore> IngestionPipeline<S> {
    pub fn new(store: S, pdf_extractor: Arc<dyn PdfTextExtractor>) -> Self {
        Self {
            store: DeduplicationStore::new(store),
            normalizer: ReadingNormalizer,
            pdf_extractor,
        }
    }

    pub fn store(&self) -> &S {
        self.store.inner()
    }

    pub async fn ingest(
        &self,
        buffer: &[u8],
        kind: FileKind,
    ) -> Result<IngestionResult, IngestError> {
        let batch = self.prepare(buffer, kind).await?;
        self.persist(batch).await
    }

    /// Parse and normalize a file without touching the store.
    pub async fn prepare(
        &self,
        buffer: &[u8],
        kind: FileKind,
    ) -> Result<PreparedBatch, ParseError> {
        let source_digest = blake3::hash(buffer).to_hex().to_string();

        let parsed = match sources::parse_file(buffer, kind, self.pdf_extractor.as_ref()).await {
            Ok(parsed) => parsed,
            Err(e) => {
                metrics::counter!("reading_files_rejected_total", "kind" => kind.as_str())
                    .increment(1);
                tracing::warn!(
                    error = %e,
                    file_kind = %kind,
                    digest = %source_digest,
                    "reading file rejected"
                );
                return Err(e);
            }
        };

        let mut skipped_null_readings = parsed.skipped_rows;
        let mut in_batch_duplicates = 0;
        let mut seen = HashSet::with_capacity(parsed.rows.len());
        let mut readings = Vec::with_capacity(parsed.rows.len());

        for row in &parsed.rows {
            match self.normalizer.apply(row, &parsed.meter_number) {
                Ok(reading) => {
                    if seen.insert(reading.reading_date) {
                        readings.push(reading);
                    } else {
                        in_batch_duplicates += 1;
                    }
                }
                Err(_) => skipped_null_readings += 1,
            }
        }

        if readings.is_empty() {
            metrics::counter!("reading_files_rejected_total", "kind" => kind.as_str()).increment(1);
            tracing::warn!(
                meter_no = %parsed.meter_number,
                file_kind = %kind,
                skipped_null_readings,
                "no usable readings after normalization"
            );
            return Err(ParseError::NoReadings);
        }

        metrics::counter!("reading_files_parsed_total", "kind" => kind.as_str()).increment(1);
        tracing::info!(
            meter_no = %parsed.meter_number,
            file_kind = %kind,
            digest = %source_digest,
            readings = readings.len(),
            in_batch_duplicates,
            skipped_null_readings,
            "reading file parsed"
        );

        Ok(PreparedBatch {
            file_kind: kind,
            meter_number: parsed.meter_number,
            readings,
            in_batch_duplicates,
            skipped_null_readings,
            source_digest,
        })
    }

    pub async fn persist(&self, batch: PreparedBatch) -> Result<IngestionResult, IngestError> {
        let total_extracted = batch.readings.len();
        let outcome = self.store.persist(&batch.meter_number, batch.readings).await?;

        let result = IngestionResult {
            file_kind: batch.file_kind,
            meter_number: batch.meter_number,
            total_extracted,
            new_saved: outcome.new_saved,
            duplicates_skipped: batch.in_batch_duplicates + outcome.duplicates_skipped,
            skipped_null_readings: batch.skipped_null_readings,
            persistence_failures: outcome.persistence_failures,
            source_digest: batch.source_digest,
            saved_readings: outcome.saved,
        };

        tracing::info!(
            meter_no = %result.meter_number,
            total_extracted = result.total_extracted,
            new_saved = result.new_saved,
            duplicates_skipped = result.duplicates_skipped,
            skipped_null_readings = result.skipped_null_readings,
            persistence_failures = result.persistence_failures,
            "meter readings ingested"
        );

        Ok(result)
    }
}

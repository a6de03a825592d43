pub mod csv_readings;
pub mod http_upload;
pub mod json_readings;
pub mod pdf_billing_profile;

pub use http_upload::{router, UploadOptions};
pub use pdf_billing_profile::{PdfTextExtractor, Pdftotext};

use crate::pipeline::{FileKind, ParseError};

/// A date cell as found in the source, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDate {
    Text(String),
    /// Spreadsheet serial day number.
    Serial(f64),
}

/// One source row before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReadingRow {
    pub meter_number: Option<String>,
    pub raw_date: Option<RawDate>,
    pub raw_total: Option<String>,
    pub raw_tod1: Option<String>,
    pub raw_tod2: Option<String>,
}

/// Parser output for one file: a single meter and its rows in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub meter_number: String,
    pub rows: Vec<ParsedReadingRow>,
    /// Source records that could not be turned into a row at all.
    pub skipped_rows: usize,
}

/// Dispatch on the declared kind.
pub async fn parse_file(
    buffer: &[u8],
    kind: FileKind,
    pdf_extractor: &dyn PdfTextExtractor,
) -> Result<ParsedFile, ParseError> {
    match kind {
        FileKind::Csv => csv_readings::parse_csv(buffer),
        FileKind::Json => json_readings::parse_json(buffer),
        FileKind::Pdf => {
            let text = pdf_extractor.extract_text(buffer).await?;
            pdf_billing_profile::parse_billing_profile_text(&text)
        }
    }
}

/// The one meter number a file is about.
///
/// First non-empty candidate wins; any other distinct value rejects the file
/// so a mixed export is never silently attributed to one meter.
pub(crate) fn resolve_meter_number<'a, I>(candidates: I) -> Result<String, ParseError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut first: Option<&str> = None;
    let mut others: Vec<&str> = Vec::new();

    for candidate in candidates {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        match first {
            None => first = Some(candidate),
            Some(f) if f == candidate => {}
            Some(_) => {
                if !others.contains(&candidate) {
                    others.push(candidate);
                }
            }
        }
    }

    let first = first.ok_or(ParseError::MissingMeterNumber)?;
    if !others.is_empty() {
        let mut all = vec![first.to_string()];
        all.extend(others.into_iter().map(str::to_string));
        return Err(ParseError::MixedMeterNumbers(all));
    }

    Ok(first.to_string())
}

use std::{path::PathBuf, process::Stdio};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::pipeline::ParseError;

use super::{ParsedFile, ParsedReadingRow, RawDate};

/// Turns a PDF document into layout-preserving plain text.
#[async_trait::async_trait]
pub trait PdfTextExtractor: Send + Sync {
    async fn extract_text(&self, pdf: &[u8]) -> Result<String, ParseError>;
}

/// Extracts text with poppler's `pdftotext -layout`, piping the document
/// through stdin/stdout.
#[derive(Debug, Clone)]
pub struct Pdftotext {
    program: PathBuf,
}

impl Pdftotext {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self { program: program.into() }
    }
}

impl Default for Pdftotext {
    fn default() -> Self {
        Self::new("pdftotext")
    }
}

#[async_trait::async_trait]
impl PdfTextExtractor for Pdftotext {
    async fn extract_text(&self, pdf: &[u8]) -> Result<String, ParseError> {
        let mut child = Command::new(&self.program)
            .args(["-layout", "-enc", "UTF-8", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ParseError::PdfExtraction(format!(
                    "failed to execute {}: {e}",
                    self.program.display()
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ParseError::PdfExtraction("pdftotext stdin unavailable".to_string()))?;
        let input = pdf.to_vec();
        // Feed stdin concurrently so a large document cannot fill the stdout pipe and stall.
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ParseError::PdfExtraction(format!("pdftotext did not complete: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ParseError::PdfExtraction(format!(
                "pdftotext exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ParseError::PdfExtraction(format!(
                    "failed to stream PDF to pdftotext: {e}"
                )))
            }
            Err(e) => {
                return Err(ParseError::PdfExtraction(format!(
                    "pdftotext writer task failed: {e}"
                )))
            }
        }

        Ok(String::from_utf8_lossy(&output.stdout).replace('\u{0000}', ""))
    }
}

static METER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:meter\s*(?:serial\s*)?(?:number|num|no|sl\.?\s*no)\b\.?|meterno\b|msn\b)",
        r"\s*[:#\-]?\s*([A-Z0-9][A-Z0-9\-/]*)",
    ))
    .expect("meter label regex is valid")
});

// Optional serial-number column, a date, an optional time, then the energy columns.
static READING_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*(?:\d{1,4}[.)]?\s+)?",
        r"(?P<date>\d{4}-\d{1,2}-\d{1,2}",
        r"|\d{1,2}[/.\-]\d{1,2}[/.\-]\d{4}",
        r"|\d{1,2}-[a-z]{3}-\d{4})",
        r"(?:[ T]+(?P<time>\d{1,2}:\d{2}(?::\d{2})?))?",
        r"(?:\s+(?P<rest>.*?))?\s*$",
    ))
    .expect("reading row regex is valid")
});

enum EnergyToken {
    Value(String),
    Null,
    Noise,
}

fn classify_token(token: &str) -> EnergyToken {
    let t = token.trim();
    if matches!(
        t.to_ascii_lowercase().as_str(),
        "-" | "--" | "na" | "n/a" | "null" | "nil"
    ) {
        return EnergyToken::Null;
    }
    let numeric = t
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == ',')
        && t.chars().any(|c| c.is_ascii_digit());
    if numeric {
        EnergyToken::Value(t.to_string())
    } else {
        EnergyToken::Noise
    }
}

/// The labelled meter number, skipping label matches whose value has no digit
/// (e.g. `Meter Number Type`).
fn find_meter_number(text: &str) -> Option<String> {
    METER_LABEL
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|v| v.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

enum LineOutcome {
    NotARow,
    Row(ParsedReadingRow),
    Noise,
}

fn parse_line(line: &str) -> LineOutcome {
    let Some(caps) = READING_ROW.captures(line) else {
        return LineOutcome::NotARow;
    };
    let Some(date) = caps.name("date") else {
        return LineOutcome::NotARow;
    };

    let raw_date = match caps.name("time") {
        Some(time) => format!("{} {}", date.as_str(), time.as_str()),
        None => date.as_str().to_string(),
    };

    let tokens: Vec<EnergyToken> = caps
        .name("rest")
        .map(|r| r.as_str().split_whitespace().take(3).map(classify_token).collect())
        .unwrap_or_default();

    // Energy columns follow the date directly; a word there means prose, not a table row.
    if matches!(tokens.first(), Some(EnergyToken::Noise)) {
        return LineOutcome::Noise;
    }

    let mut energies = tokens.into_iter().map(|t| match t {
        EnergyToken::Value(v) => Some(v),
        EnergyToken::Null | EnergyToken::Noise => None,
    });

    LineOutcome::Row(ParsedReadingRow {
        meter_number: None,
        raw_date: Some(RawDate::Text(raw_date)),
        raw_total: energies.next().flatten(),
        raw_tod1: energies.next().flatten(),
        raw_tod2: energies.next().flatten(),
    })
}

/// Parse the text layer of a billing-profile PDF.
///
/// Layout extraction is noisy, so lines that start with a date but carry no
/// recognisable energy columns are counted in `skipped_rows` instead of
/// failing the file.
pub fn parse_billing_profile_text(text: &str) -> Result<ParsedFile, ParseError> {
    let meter_number = find_meter_number(text).ok_or(ParseError::MissingMeterNumber)?;

    let mut rows = Vec::new();
    let mut skipped_rows = 0;
    for line in text.lines() {
        match parse_line(line) {
            LineOutcome::NotARow => {}
            LineOutcome::Row(row) => rows.push(row),
            LineOutcome::Noise => {
                skipped_rows += 1;
                tracing::debug!(line, "skipping billing profile line without energy columns");
            }
        }
    }

    if rows.is_empty() {
        return Err(ParseError::NoReadings);
    }

    Ok(ParsedFile {
        meter_number,
        rows,
        skipped_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = "\
        Customer Name : A. Rahman            Billing Profile\n\
        Meter Number Type : Smart Prepaid\n\
        Meter No.: 33008307                  Tariff: LT-A\n\
        \n\
        SL  Date              Total(kWh)   TOD1(kWh)   TOD2(kWh)\n\
        1   01/01/2025 00:00  1,200.50     800.25      400.25\n\
        2   02/01/2025 00:00  1,210.00     805.00      405.00\n\
        3   03/01/2025 00:00  -            -           -\n\
        4   04/01/2025 00:00  Page 2 of 3\n\
        5   05-Jan-2025       1,230.75     N/A         415.10\n\
        Printed on 06/01/2025\n";

    #[test]
    fn labelled_meter_number_is_found() {
        assert_eq!(find_meter_number(PROFILE).as_deref(), Some("33008307"));
        assert_eq!(find_meter_number("METERNO: MSN-0042").as_deref(), Some("MSN-0042"));
        assert_eq!(find_meter_number("Meter Serial No # 77A1").as_deref(), Some("77A1"));
        assert_eq!(find_meter_number("no meter label here"), None);
    }

    #[test]
    fn reading_rows_are_extracted_and_noise_counted() {
        let parsed = parse_billing_profile_text(PROFILE).unwrap();
        assert_eq!(parsed.meter_number, "33008307");
        assert_eq!(parsed.rows.len(), 4);
        assert_eq!(parsed.skipped_rows, 1);

        let first = &parsed.rows[0];
        assert_eq!(first.raw_date, Some(RawDate::Text("01/01/2025 00:00".to_string())));
        assert_eq!(first.raw_total.as_deref(), Some("1,200.50"));
        assert_eq!(first.raw_tod1.as_deref(), Some("800.25"));
        assert_eq!(first.raw_tod2.as_deref(), Some("400.25"));

        let dashes = &parsed.rows[2];
        assert_eq!(dashes.raw_total, None);
        assert_eq!(dashes.raw_tod1, None);
        assert_eq!(dashes.raw_tod2, None);

        let last = &parsed.rows[3];
        assert_eq!(last.raw_date, Some(RawDate::Text("05-Jan-2025".to_string())));
        assert_eq!(last.raw_total.as_deref(), Some("1,230.75"));
        assert_eq!(last.raw_tod1, None);
        assert_eq!(last.raw_tod2.as_deref(), Some("415.10"));
    }

    #[test]
    fn trailing_text_after_a_date_is_noise_not_a_row() {
        assert!(matches!(parse_line("Printed on 06/01/2025"), LineOutcome::NotARow));
        assert!(matches!(parse_line("01/01/2025 to 31/01/2025"), LineOutcome::Noise));
        assert!(matches!(parse_line("2025-01-01 12.5"), LineOutcome::Row(_)));
    }

    #[test]
    fn missing_label_or_rows_fail_the_file() {
        assert_eq!(
            parse_billing_profile_text("01/01/2025 100 50 50\n").unwrap_err(),
            ParseError::MissingMeterNumber
        );
        assert_eq!(
            parse_billing_profile_text("Meter No: 123456\nno table here\n").unwrap_err(),
            ParseError::NoReadings
        );
    }

    #[tokio::test]
    async fn missing_pdftotext_binary_is_an_extraction_error() {
        let extractor = Pdftotext::new("/nonexistent/pdftotext");
        let err = extractor.extract_text(b"%PDF-1.4").await.unwrap_err();
        assert!(matches!(err, ParseError::PdfExtraction(_)));
    }
}

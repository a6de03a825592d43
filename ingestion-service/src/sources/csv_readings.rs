use csv::StringRecord;

use crate::pipeline::ParseError;

use super::{resolve_meter_number, ParsedFile, ParsedReadingRow, RawDate};

const METER_COLUMNS: &[&str] = &["meterno", "meter_no", "meter_number", "meter", "msn"];
const DATE_COLUMNS: &[&str] = &["readdttm", "reading_date", "read_date", "date", "ts"];
const TOTAL_COLUMNS: &[&str] = &["read", "total_energy", "total", "kwh", "value_kwh"];
const TOD1_COLUMNS: &[&str] = &["tod1", "tod1_energy"];
const TOD2_COLUMNS: &[&str] = &["tod2", "tod2_energy"];

/// Column positions resolved from the header row.
///
/// Header names are matched case-insensitively, with spaces treated as
/// underscores, against the aliases the utility exports use (`METERNO`,
/// `readdttm`, `read`, `TOD1_ENERGY`, ...).
#[derive(Debug, Default, PartialEq)]
struct ColumnMap {
    meter: Option<usize>,
    date: Option<usize>,
    total: Option<usize>,
    tod1: Option<usize>,
    tod2: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Self {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim().to_ascii_lowercase().replace(' ', "_"))
            .collect();
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| normalized.iter().position(|h| h == alias))
        };

        Self {
            meter: find(METER_COLUMNS),
            date: find(DATE_COLUMNS),
            total: find(TOTAL_COLUMNS),
            tod1: find(TOD1_COLUMNS),
            tod2: find(TOD2_COLUMNS),
        }
    }

    fn has_energy(&self) -> bool {
        self.total.is_some() || self.tod1.is_some() || self.tod2.is_some()
    }
}

/// Pick the delimiter from the header line: whichever of `,` `;` tab `|`
/// occurs most often (earlier wins a tie), `,` when none does.
fn detect_delimiter(buffer: &[u8]) -> u8 {
    let header = buffer.split(|b| *b == b'\n').next().unwrap_or_default();
    let mut best = (b',', 0);
    for d in [b',', b';', b'\t', b'|'] {
        let n = header.iter().filter(|b| **b == d).count();
        if n > best.1 {
            best = (d, n);
        }
    }
    best.0
}

fn cell(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    let trimmed = record.get(idx?)?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn record_to_row(record: &StringRecord, columns: &ColumnMap) -> ParsedReadingRow {
    ParsedReadingRow {
        meter_number: cell(record, columns.meter),
        raw_date: cell(record, columns.date).map(RawDate::Text),
        raw_total: cell(record, columns.total),
        raw_tod1: cell(record, columns.tod1),
        raw_tod2: cell(record, columns.tod2),
    }
}

/// Parse a CSV/TXT meter-reading export (`METERNO,readdttm,read[,TOD1,TOD2]`).
pub fn parse_csv(buffer: &[u8]) -> Result<ParsedFile, ParseError> {
    let buffer = buffer.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(buffer);

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(buffer))
        .flexible(true)
        .from_reader(buffer);
    let headers = rdr
        .headers()
        .map_err(|e| ParseError::Unreadable(format!("failed to read CSV headers: {e}")))?
        .clone();

    let columns = ColumnMap::from_headers(&headers);
    if columns.meter.is_none() {
        return Err(ParseError::MissingMeterNumber);
    }
    if columns.date.is_none() {
        return Err(ParseError::MissingColumns("reading date (readdttm)".to_string()));
    }
    if !columns.has_energy() {
        return Err(ParseError::MissingColumns("energy reading (read, TOD1, TOD2)".to_string()));
    }

    let mut rows = Vec::new();
    let mut skipped_rows = 0;
    for (line, result) in rdr.records().enumerate() {
        match result {
            Ok(record) => {
                if record.iter().all(|f| f.trim().is_empty()) {
                    continue;
                }
                rows.push(record_to_row(&record, &columns));
            }
            Err(e) => {
                skipped_rows += 1;
                metrics::counter!("reading_csv_parse_errors_total").increment(1);
                tracing::warn!(error = %e, record = line + 1, "skipping unreadable CSV record");
            }
        }
    }

    if rows.is_empty() {
        return Err(ParseError::NoReadings);
    }

    let meter_number = resolve_meter_number(rows.iter().filter_map(|r| r.meter_number.as_deref()))?;

    Ok(ParsedFile {
        meter_number,
        rows,
        skipped_rows,
    })
}

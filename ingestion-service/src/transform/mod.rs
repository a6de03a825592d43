use readings_client::domain::NewMeterReading;
use time::{
    format_description::well_known::Rfc3339,
    macros::{datetime, format_description},
    Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset,
};

use crate::sources::{ParsedReadingRow, RawDate};

/// Days between the spreadsheet epoch (1899-12-30) and the Unix epoch.
pub const SPREADSHEET_EPOCH_OFFSET_DAYS: f64 = 25569.0;

/// Serial of 9999-12-31, the last date spreadsheets can represent.
const MAX_SPREADSHEET_SERIAL: f64 = 2_958_465.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Why a single row was dropped. Non-terminal: the row is tallied and
/// processing continues.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RowRejected {
    #[error("row has no reading date")]
    MissingDate,
    #[error("unresolvable reading date '{0}'")]
    UnresolvableDate(String),
    #[error("reading date outside the accepted window")]
    DateOutOfRange,
    #[error("row has no energy values")]
    NoEnergyValues,
}

impl RowRejected {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingDate => "missing_date",
            Self::UnresolvableDate(_) => "unresolvable_date",
            Self::DateOutOfRange => "date_out_of_range",
            Self::NoEnergyValues => "no_energy_values",
        }
    }
}

/// Convert a spreadsheet serial day number (fractional part = time of day)
/// to a UTC timestamp, rounded to the second.
pub fn serial_to_datetime(serial: f64) -> Option<OffsetDateTime> {
    if !serial.is_finite() || !(1.0..=MAX_SPREADSHEET_SERIAL).contains(&serial) {
        return None;
    }
    let seconds = ((serial - SPREADSHEET_EPOCH_OFFSET_DAYS) * SECONDS_PER_DAY).round() as i64;
    OffsetDateTime::from_unix_timestamp(seconds).ok()
}

/// `yyyymmdd`
fn compact_date(s: &str) -> Option<Date> {
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month: u8 = s.get(4..6)?.parse().ok()?;
    let day: u8 = s.get(6..8)?.parse().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

fn parse_date_text(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(ts.to_offset(UtcOffset::UTC));
    }

    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        return compact_date(s).map(|d| d.midnight().assume_utc());
    }

    if let Ok(serial) = s.parse::<f64>() {
        return serial_to_datetime(serial);
    }

    // A time of day follows the date after a space or an ISO `T`. Month names
    // can contain a `T` (`OCT`), so only a letter-free prefix splits on it.
    let (date_part, time_part) = match s.split_once(char::is_whitespace) {
        Some((date, time)) => (date, Some(time.trim())),
        None => match s.split_once('T') {
            Some((date, time)) if !date.bytes().any(|b| b.is_ascii_alphabetic()) => {
                (date, Some(time))
            }
            _ => (s, None),
        },
    };

    let date = parse_calendar_date(date_part)?;
    match time_part {
        None => Some(date.midnight().assume_utc()),
        Some(time) => Some(PrimitiveDateTime::new(date, parse_time_of_day(time)?).assume_utc()),
    }
}

/// Day-first: the billing exports this service receives never use month-first.
fn parse_calendar_date(s: &str) -> Option<Date> {
    let formats = [
        format_description!("[year]-[month padding:none]-[day padding:none]"),
        format_description!("[year]/[month padding:none]/[day padding:none]"),
        format_description!("[day padding:none]/[month padding:none]/[year]"),
        format_description!("[day padding:none]-[month padding:none]-[year]"),
        format_description!("[day padding:none].[month padding:none].[year]"),
        format_description!("[day padding:none]-[month repr:short case_sensitive:false]-[year]"),
    ];
    formats.into_iter().find_map(|fmt| Date::parse(s, fmt).ok())
}

fn parse_time_of_day(s: &str) -> Option<Time> {
    let formats = [
        format_description!("[hour padding:none]:[minute]:[second].[subsecond]"),
        format_description!("[hour padding:none]:[minute]:[second]"),
        format_description!("[hour padding:none]:[minute]"),
    ];
    formats.into_iter().find_map(|fmt| Time::parse(s, fmt).ok())
}

/// Resolve a raw date cell to a UTC timestamp inside [2000-01-01, 2100-01-01].
pub fn parse_reading_date(raw: &RawDate) -> Result<OffsetDateTime, RowRejected> {
    let ts = match raw {
        RawDate::Serial(serial) => {
            serial_to_datetime(*serial)
                .ok_or_else(|| RowRejected::UnresolvableDate(serial.to_string()))?
        }
        RawDate::Text(text) => {
            parse_date_text(text)
                .ok_or_else(|| RowRejected::UnresolvableDate(text.trim().to_string()))?
        }
    };

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);
    if ts < min_ts || ts > max_ts {
        return Err(RowRejected::DateOutOfRange);
    }

    Ok(ts)
}

fn is_null_token(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "-" | "--" | "na" | "n/a" | "null" | "nil" | "none"
    )
}

/// Parse one energy counter. Empty, null-like, non-numeric, non-finite and
/// negative values are absent, never zero.
pub fn parse_energy(raw: Option<&str>) -> Option<f64> {
    let mut s = raw?.trim();
    if s.is_empty() || is_null_token(s) {
        return None;
    }
    if let Some(unit) = s.len().checked_sub(3).and_then(|at| s.get(at..)) {
        if unit.eq_ignore_ascii_case("kwh") {
            s = s[..s.len() - 3].trim_end();
        }
    }

    let cleaned = if s.contains('.') {
        s.replace(',', "")
    } else {
        match s.split_once(',') {
            // "1,234" is a thousands separator, "100,5" and "0,125" decimal commas.
            Some((head, tail)) if tail.len() == 3 && !tail.contains(',') && head != "0" => {
                tracing::debug!(raw = s, "single comma before three digits read as thousands");
                s.replace(',', "")
            }
            Some((_, tail)) if !tail.contains(',') => s.replacen(',', ".", 1),
            Some(_) => s.replace(',', ""),
            None => s.to_string(),
        }
    };

    let value: f64 = cleaned.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Validate one parsed row into an insertable reading.
pub fn normalize_row(
    row: &ParsedReadingRow,
    meter_no: &str,
) -> Result<NewMeterReading, RowRejected> {
    let raw_date = row.raw_date.as_ref().ok_or(RowRejected::MissingDate)?;
    let reading_date = parse_reading_date(raw_date)?;

    let reading = NewMeterReading {
        meter_no: meter_no.to_string(),
        reading_date,
        total_energy: parse_energy(row.raw_total.as_deref()),
        tod1_energy: parse_energy(row.raw_tod1.as_deref()),
        tod2_energy: parse_energy(row.raw_tod2.as_deref()),
    };

    if !reading.has_energy() {
        return Err(RowRejected::NoEnergyValues);
    }

    Ok(reading)
}

/// Row normalization step of the pipeline; records rejections.
#[derive(Clone, Copy, Default)]
pub struct ReadingNormalizer;

impl ReadingNormalizer {
    pub fn apply(
        &self,
        row: &ParsedReadingRow,
        meter_no: &str,
    ) -> Result<NewMeterReading, RowRejected> {
        match normalize_row(row, meter_no) {
            Ok(reading) => Ok(reading),
            Err(e) => {
                metrics::counter!("reading_rows_rejected_total", "reason" => e.reason())
                    .increment(1);
                tracing::debug!(meter_no, reason = e.reason(), error = %e, "reading row rejected");
                Err(e)
            }
        }
    }
}

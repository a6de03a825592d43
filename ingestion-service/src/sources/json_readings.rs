use serde::Deserialize;
use serde_json::Value;

use crate::pipeline::ParseError;

use super::{resolve_meter_number, ParsedFile, ParsedReadingRow, RawDate};

/// A JSON scalar as spreadsheet-to-JSON converters emit it: dates and
/// counters arrive either as numbers or as text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonReading {
    #[serde(default, alias = "meter_no", alias = "meterNo", alias = "METERNO")]
    meter_number: Option<Scalar>,
    #[serde(default, alias = "reading_date", alias = "readdttm")]
    reading_date: Option<Scalar>,
    #[serde(default, alias = "total_energy", alias = "read")]
    total_energy_kwh: Option<Scalar>,
    #[serde(default, alias = "tod1_energy")]
    tod1_energy_kwh: Option<Scalar>,
    #[serde(default, alias = "tod2_energy")]
    tod2_energy_kwh: Option<Scalar>,
}

impl From<JsonReading> for ParsedReadingRow {
    fn from(r: JsonReading) -> Self {
        ParsedReadingRow {
            meter_number: r.meter_number.map(Scalar::into_text),
            raw_date: r.reading_date.map(|d| match d {
                Scalar::Number(serial) => RawDate::Serial(serial),
                Scalar::Text(text) => RawDate::Text(text),
            }),
            raw_total: r.total_energy_kwh.map(Scalar::into_text),
            raw_tod1: r.tod1_energy_kwh.map(Scalar::into_text),
            raw_tod2: r.tod2_energy_kwh.map(Scalar::into_text),
        }
    }
}

/// Bulk uploads come either as a bare array of readings or wrapped with a
/// document-level meter number. Elements stay untyped here so one malformed
/// reading does not reject the upload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonUpload {
    Rows(Vec<Value>),
    #[serde(rename_all = "camelCase")]
    Document {
        #[serde(default, alias = "meter_no", alias = "meterNo")]
        meter_number: Option<Scalar>,
        readings: Vec<Value>,
    },
}

/// Parse a JSON bulk upload of readings.
pub fn parse_json(buffer: &[u8]) -> Result<ParsedFile, ParseError> {
    let upload: JsonUpload = serde_json::from_slice(buffer)
        .map_err(|e| ParseError::Unreadable(format!("invalid JSON readings: {e}")))?;

    let (document_meter, elements) = match upload {
        JsonUpload::Rows(elements) => (None, elements),
        JsonUpload::Document {
            meter_number,
            readings,
        } => (meter_number.map(Scalar::into_text), readings),
    };

    let mut rows = Vec::with_capacity(elements.len());
    let mut skipped_rows = 0;
    for (index, element) in elements.into_iter().enumerate() {
        match serde_json::from_value::<JsonReading>(element) {
            Ok(reading) => rows.push(ParsedReadingRow::from(reading)),
            Err(e) => {
                skipped_rows += 1;
                metrics::counter!("reading_json_parse_errors_total").increment(1);
                tracing::warn!(error = %e, element = index, "skipping unreadable JSON reading");
            }
        }
    }

    if rows.is_empty() {
        return Err(ParseError::NoReadings);
    }

    let meter_number = resolve_meter_number(
        document_meter
            .as_deref()
            .into_iter()
            .chain(rows.iter().filter_map(|r| r.meter_number.as_deref())),
    )?;

    Ok(ParsedFile {
        meter_number,
        rows,
        skipped_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_of_readings_with_serial_and_text_dates() {
        let input = br#"[
            {"meterNumber": "MSN1", "readingDate": 45659,
             "totalEnergyKwh": 100.5, "tod1EnergyKwh": null},
            {"meter_no": "MSN1", "reading_date": "2025-01-03",
             "total_energy": "105.25", "tod2_energy": 40}
        ]"#;
        let parsed = parse_json(input).unwrap();
        assert_eq!(parsed.meter_number, "MSN1");
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].raw_date, Some(RawDate::Serial(45659.0)));
        assert_eq!(parsed.rows[0].raw_total.as_deref(), Some("100.5"));
        assert_eq!(parsed.rows[0].raw_tod1, None);
        assert_eq!(
            parsed.rows[1].raw_date,
            Some(RawDate::Text("2025-01-03".to_string()))
        );
        assert_eq!(parsed.rows[1].raw_tod2.as_deref(), Some("40"));
    }

    #[test]
    fn numeric_meter_numbers_are_kept_as_text() {
        let parsed =
            parse_json(br#"[{"METERNO": 10891641, "readdttm": "2025-01-01", "read": 1}]"#)
                .unwrap();
        assert_eq!(parsed.meter_number, "10891641");

        let parsed = parse_json(
            br#"{"meterNumber": 10891641, "readings": [{"readingDate": "2025-01-01", "read": 1}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.meter_number, "10891641");
    }

    #[test]
    fn document_form_supplies_the_meter() {
        let input = br#"{"meterNumber": "MSN9",
            "readings": [{"readingDate": "2025-01-01", "totalEnergyKwh": 1}]}"#;
        let parsed = parse_json(input).unwrap();
        assert_eq!(parsed.meter_number, "MSN9");
        assert_eq!(parsed.rows[0].meter_number, None);
    }

    #[test]
    fn mistyped_reading_is_skipped_not_fatal() {
        let input = br#"[
            {"meterNumber": "MSN1", "readingDate": "2025-01-01", "totalEnergyKwh": 1},
            {"meterNumber": "MSN1", "readingDate": true, "totalEnergyKwh": 2},
            42
        ]"#;
        let parsed = parse_json(input).unwrap();
        assert_eq!(parsed.meter_number, "MSN1");
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.skipped_rows, 2);
    }

    #[test]
    fn malformed_or_empty_uploads_fail() {
        assert!(matches!(parse_json(b"{not json"), Err(ParseError::Unreadable(_))));
        assert_eq!(parse_json(b"[]").unwrap_err(), ParseError::NoReadings);
        assert_eq!(
            parse_json(br#"[{"readingDate": true}]"#).unwrap_err(),
            ParseError::NoReadings
        );
        assert_eq!(
            parse_json(br#"[{"readingDate": "2025-01-01", "totalEnergyKwh": 1}]"#).unwrap_err(),
            ParseError::MissingMeterNumber
        );
    }
}

use time::OffsetDateTime;

/// A stored meter reading.
///
/// `(meter_no, reading_date)` is the natural key; the schema backs it with a
/// unique index.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeterReading {
    pub id: i64,
    pub meter_no: String,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub reading_date: OffsetDateTime,
    pub total_energy: Option<f64>,
    pub tod1_energy: Option<f64>,
    pub tod2_energy: Option<f64>,
    pub is_estimated: bool,
    pub estimation_method: Option<String>,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub estimated_at: Option<OffsetDateTime>,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub created_at: OffsetDateTime,
}

/// Insert payload for a measured (never estimated) reading.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NewMeterReading {
    pub meter_no: String,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub reading_date: OffsetDateTime,
    pub total_energy: Option<f64>,
    pub tod1_energy: Option<f64>,
    pub tod2_energy: Option<f64>,
}

impl NewMeterReading {
    pub fn has_energy(&self) -> bool {
        self.total_energy.is_some() || self.tod1_energy.is_some() || self.tod2_energy.is_some()
    }

    /// Materialize the stored row as the database would return it.
    pub fn into_reading(self, id: i64, created_at: OffsetDateTime) -> MeterReading {
        MeterReading {
            id,
            meter_no: self.meter_no,
            reading_date: self.reading_date,
            total_energy: self.total_energy,
            tod1_energy: self.tod1_energy,
            tod2_energy: self.tod2_energy,
            is_estimated: false,
            estimation_method: None,
            estimated_at: None,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn into_reading_marks_row_as_measured() {
        let new = NewMeterReading {
            meter_no: "MSN1".to_string(),
            reading_date: datetime!(2025-01-01 00:00:00 UTC),
            total_energy: Some(100.5),
            tod1_energy: None,
            tod2_energy: Some(40.0),
        };
        assert!(new.has_energy());

        let created = datetime!(2025-02-01 12:00:00 UTC);
        let stored = new.clone().into_reading(7, created);
        assert_eq!(stored.id, 7);
        assert_eq!(stored.meter_no, "MSN1");
        assert_eq!(stored.reading_date, new.reading_date);
        assert_eq!(stored.tod2_energy, Some(40.0));
        assert!(!stored.is_estimated);
        assert!(stored.estimation_method.is_none());
        assert!(stored.estimated_at.is_none());
        assert_eq!(stored.created_at, created);
    }

    #[test]
    fn reading_without_any_counter_has_no_energy() {
        let new = NewMeterReading {
            meter_no: "MSN1".to_string(),
            reading_date: datetime!(2025-01-01 00:00:00 UTC),
            total_energy: None,
            tod1_energy: None,
            tod2_energy: None,
        };
        assert!(!new.has_energy());
    }
}

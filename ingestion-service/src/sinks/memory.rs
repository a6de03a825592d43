use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

use readings_client::domain::{MeterReading, NewMeterReading};
use time::OffsetDateTime;

use super::{InsertOutcome, ReadingStore, StoreError};

/// Process-local store with the same uniqueness rule as the database schema.
/// Backs dry runs and tests.
#[derive(Default)]
pub struct InMemoryReadingStore {
    rows: Mutex<Vec<MeterReading>>,
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn readings_for(&self, meter_no: &str) -> Vec<MeterReading> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.iter().filter(|r| r.meter_no == meter_no).cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait::async_trait]
impl ReadingStore for InMemoryReadingStore {
    async fn find_existing_dates(
        &self,
        meter_no: &str,
    ) -> Result<HashSet<OffsetDateTime>, StoreError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .iter()
            .filter(|r| r.meter_no == meter_no)
            .map(|r| r.reading_date)
            .collect())
    }

    async fn insert_reading(
        &self,
        reading: &NewMeterReading,
    ) -> Result<InsertOutcome, StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if rows
            .iter()
            .any(|r| r.meter_no == reading.meter_no && r.reading_date == reading.reading_date)
        {
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let id = rows.len() as i64 + 1;
        let row = reading.clone().into_reading(id, OffsetDateTime::now_utc());
        rows.push(row.clone());
        Ok(InsertOutcome::Inserted(row))
    }
}

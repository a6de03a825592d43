use readings_client::domain::{MeterReading, NewMeterReading};

use super::{InsertOutcome, ReadingStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistOutcome {
    pub new_saved: usize,
    pub duplicates_skipped: usize,
    /// Readings whose insert failed after retries. They are not saved and
    /// a later upload of the same file will pick them up.
    pub persistence_failures: usize,
    /// Newly inserted rows, in input order.
    pub saved: Vec<MeterReading>,
}

/// Inserts only readings whose date is not yet stored for the meter.
///
/// Existing dates are fetched once per call. A failed insert is logged and
/// counted, and the remaining readings are still attempted.
pub struct DeduplicationStore<S> {
    inner: S,
}

impl<S: ReadingStore> DeduplicationStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn persist(
        &self,
        meter_no: &str,
        readings: Vec<NewMeterReading>,
    ) -> Result<PersistOutcome, StoreError> {
        let mut existing = self.inner.find_existing_dates(meter_no).await?;
        let mut outcome = PersistOutcome::default();

        for reading in readings {
            if existing.contains(&reading.reading_date) {
                outcome.duplicates_skipped += 1;
                metrics::counter!("readings_duplicate_total").increment(1);
                continue;
            }

            match self.inner.insert_reading(&reading).await {
                Ok(InsertOutcome::Inserted(row)) => {
                    existing.insert(row.reading_date);
                    outcome.new_saved += 1;
                    outcome.saved.push(row);
                    metrics::counter!("readings_saved_total").increment(1);
                }
                Ok(InsertOutcome::AlreadyPresent) => {
                    existing.insert(reading.reading_date);
                    outcome.duplicates_skipped += 1;
                    metrics::counter!("readings_duplicate_total").increment(1);
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        meter_no,
                        reading_date = %reading.reading_date,
                        "failed to save meter reading"
                    );
                    outcome.persistence_failures += 1;
                    metrics::counter!("reading_insert_failures_total").increment(1);
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::InMemoryReadingStore;
    use std::collections::HashSet;
    use time::{macros::datetime, OffsetDateTime};

    fn reading(ts: OffsetDateTime, total: f64) -> NewMeterReading {
        NewMeterReading {
            meter_no: "MSN1".to_string(),
            reading_date: ts,
            total_energy: Some(total),
            tod1_energy: None,
            tod2_energy: None,
        }
    }

    /// Fails inserts for one date; everything else goes to memory.
    struct FlakyStore {
        inner: InMemoryReadingStore,
        failing_date: OffsetDateTime,
    }

    #[async_trait::async_trait]
    impl ReadingStore for FlakyStore {
        async fn find_existing_dates(
            &self,
            meter_no: &str,
        ) -> Result<HashSet<OffsetDateTime>, StoreError> {
            self.inner.find_existing_dates(meter_no).await
        }

        async fn insert_reading(
            &self,
            reading: &NewMeterReading,
        ) -> Result<InsertOutcome, StoreError> {
            if reading.reading_date == self.failing_date {
                return Err(StoreError::Insert {
                    meter_no: reading.meter_no.clone(),
                    reading_date: reading.reading_date,
                    message: "connection reset".to_string(),
                });
            }
            self.inner.insert_reading(reading).await
        }
    }

    /// Reports no existing dates, so every duplicate is caught by the insert.
    struct BlindLookup(InMemoryReadingStore);

    #[async_trait::async_trait]
    impl ReadingStore for BlindLookup {
        async fn find_existing_dates(
            &self,
            _meter_no: &str,
        ) -> Result<HashSet<OffsetDateTime>, StoreError> {
            Ok(HashSet::new())
        }

        async fn insert_reading(
            &self,
            reading: &NewMeterReading,
        ) -> Result<InsertOutcome, StoreError> {
            self.0.insert_reading(reading).await
        }
    }

    struct BrokenLookup;

    #[async_trait::async_trait]
    impl ReadingStore for BrokenLookup {
        async fn find_existing_dates(
            &self,
            meter_no: &str,
        ) -> Result<HashSet<OffsetDateTime>, StoreError> {
            Err(StoreError::Lookup {
                meter_no: meter_no.to_string(),
                message: "pool timed out".to_string(),
            })
        }

        async fn insert_reading(
            &self,
            _reading: &NewMeterReading,
        ) -> Result<InsertOutcome, StoreError> {
            unreachable!("lookup failure must stop the batch")
        }
    }

    #[tokio::test]
    async fn stored_dates_are_skipped_and_new_ones_saved() {
        let store = DeduplicationStore::new(InMemoryReadingStore::new());
        let d1 = datetime!(2025-01-01 00:00:00 UTC);
        let d2 = datetime!(2025-01-02 00:00:00 UTC);

        let first = store.persist("MSN1", vec![reading(d1, 1.0)]).await.unwrap();
        assert_eq!(first.new_saved, 1);

        let second = store
            .persist("MSN1", vec![reading(d1, 1.0), reading(d2, 2.0)])
            .await
            .unwrap();
        assert_eq!(second.new_saved, 1);
        assert_eq!(second.duplicates_skipped, 1);
        assert_eq!(second.saved.len(), 1);
        assert_eq!(second.saved[0].reading_date, d2);
        assert_eq!(store.inner().len(), 2);
    }

    #[tokio::test]
    async fn failed_insert_does_not_stop_the_batch() {
        let d1 = datetime!(2025-01-01 00:00:00 UTC);
        let d2 = datetime!(2025-01-02 00:00:00 UTC);
        let d3 = datetime!(2025-01-03 00:00:00 UTC);
        let store = DeduplicationStore::new(FlakyStore {
            inner: InMemoryReadingStore::new(),
            failing_date: d2,
        });

        let outcome = store
            .persist("MSN1", vec![reading(d1, 1.0), reading(d2, 2.0), reading(d3, 3.0)])
            .await
            .unwrap();
        assert_eq!(outcome.new_saved, 2);
        assert_eq!(outcome.persistence_failures, 1);
        assert_eq!(outcome.duplicates_skipped, 0);
        assert_eq!(store.inner().inner.len(), 2);
    }

    #[tokio::test]
    async fn conflict_on_insert_counts_as_duplicate() {
        let d1 = datetime!(2025-01-01 00:00:00 UTC);
        let backing = InMemoryReadingStore::new();
        backing.insert_reading(&reading(d1, 1.0)).await.unwrap();
        let store = DeduplicationStore::new(BlindLookup(backing));

        let outcome = store.persist("MSN1", vec![reading(d1, 1.0)]).await.unwrap();
        assert_eq!(outcome.new_saved, 0);
        assert_eq!(outcome.duplicates_skipped, 1);
        assert!(outcome.saved.is_empty());
    }

    #[tokio::test]
    async fn lookup_failure_fails_the_whole_batch() {
        let store = DeduplicationStore::new(BrokenLookup);
        let err = store
            .persist("MSN1", vec![reading(datetime!(2025-01-01 00:00:00 UTC), 1.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Lookup { .. }));
    }
}

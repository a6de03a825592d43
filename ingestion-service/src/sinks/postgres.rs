use std::{collections::HashSet, time::Duration};

use readings_client::{db, domain::NewMeterReading};
use sqlx::postgres::PgPool;
use time::OffsetDateTime;

use super::{InsertOutcome, ReadingStore, StoreError};

pub struct PgReadingStore {
    pool: PgPool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgReadingStore {
    pub fn new(pool: PgPool, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            max_retries,
            retry_backoff,
        }
    }
}

#[async_trait::async_trait]
impl ReadingStore for PgReadingStore {
    async fn find_existing_dates(
        &self,
        meter_no: &str,
    ) -> Result<HashSet<OffsetDateTime>, StoreError> {
        db::existing_reading_dates(&self.pool, meter_no)
            .await
            .map_err(|e| StoreError::Lookup {
                meter_no: meter_no.to_string(),
                message: format!("{e:#}"),
            })
    }

    async fn insert_reading(
        &self,
        reading: &NewMeterReading,
    ) -> Result<InsertOutcome, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            match db::insert_reading(&self.pool, reading).await {
                Ok(Some(row)) => return Ok(InsertOutcome::Inserted(row)),
                Ok(None) => return Ok(InsertOutcome::AlreadyPresent),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        meter_no = %reading.meter_no,
                        "meter reading insert failed, retrying with backoff"
                    );
                    metrics::counter!("reading_insert_retry_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    return Err(StoreError::Insert {
                        meter_no: reading.meter_no.clone(),
                        reading_date: reading.reading_date,
                        message: format!("{e:#}"),
                    })
                }
            }
        }
    }
}

pub mod dedup;
pub mod memory;
pub mod postgres;

use std::collections::HashSet;

use readings_client::domain::{MeterReading, NewMeterReading};
use time::OffsetDateTime;

pub use dedup::{DeduplicationStore, PersistOutcome};
pub use memory::InMemoryReadingStore;
pub use postgres::PgReadingStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("failed to load existing readings for meter {meter_no}: {message}")]
    Lookup { meter_no: String, message: String },
    #[error("failed to insert reading for meter {meter_no} at {reading_date}: {message}")]
    Insert {
        meter_no: String,
        reading_date: OffsetDateTime,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(MeterReading),
    /// The `(meter_no, reading_date)` key was already taken.
    AlreadyPresent,
}

/// Persistence boundary of the pipeline.
#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync {
    /// Every stored reading date for the meter, in one round trip.
    async fn find_existing_dates(
        &self,
        meter_no: &str,
    ) -> Result<HashSet<OffsetDateTime>, StoreError>;

    async fn insert_reading(&self, reading: &NewMeterReading) -> Result<InsertOutcome, StoreError>;
}

pub mod meter_reading_queries;

pub use meter_reading_queries::{apply_schema, existing_reading_dates, insert_reading};

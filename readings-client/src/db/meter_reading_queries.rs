use std::collections::HashSet;

use anyhow::{Context, Result};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{MeterReading, NewMeterReading};

const SCHEMA_SQL: &str = include_str!("../../sql/schema/01_meter_readings.sql");

/// Create the `meter_readings` table and its indexes if they are missing.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await
        .context("failed to apply meter_readings schema")?;
    Ok(())
}

/// All reading dates already stored for one meter, fetched in a single query.
pub async fn existing_reading_dates(
    pool: &PgPool,
    meter_no: &str,
) -> Result<HashSet<OffsetDateTime>> {
    let rows: Vec<(OffsetDateTime,)> = sqlx::query_as(
        r#"
        SELECT reading_date
        FROM meter_readings
        WHERE meter_no = $1
        "#,
    )
    .bind(meter_no)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(ts,)| ts).collect())
}

/// Insert one reading.
///
/// Returns `None` when the `(meter_no, reading_date)` unique index already
/// holds a row, which happens when another writer got there first.
pub async fn insert_reading(
    pool: &PgPool,
    reading: &NewMeterReading,
) -> Result<Option<MeterReading>> {
    let row = sqlx::query_as::<_, MeterReading>(
        r#"
        INSERT INTO meter_readings (meter_no, reading_date, total_energy, tod1_energy, tod2_energy)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (meter_no, reading_date) DO NOTHING
        RETURNING
            id,
            meter_no,
            reading_date,
            total_energy,
            tod1_energy,
            tod2_energy,
            is_estimated,
            estimation_method,
            estimated_at,
            created_at
        "#,
    )
    .bind(&reading.meter_no)
    .bind(reading.reading_date)
    .bind(reading.total_energy)
    .bind(reading.tod1_energy)
    .bind(reading.tod2_energy)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

use anyhow::Result;
use reading_ingestion::{
    config::AppConfig,
    metrics_server,
    observability,
    pipeline::IngestionPipeline,
    sinks::PgReadingStore,
    sources::{self, Pdftotext, UploadOptions},
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    if cfg.database.apply_schema {
        readings_client::db::apply_schema(&pool).await?;
        tracing::info!("meter_readings schema applied");
    }

    let store = PgReadingStore::new(
        pool,
        cfg.ingestion.max_insert_retries,
        Duration::from_millis(cfg.ingestion.retry_backoff_ms),
    );
    let pdf = Arc::new(Pdftotext::new(&cfg.ingestion.pdftotext_program));
    let pipeline = Arc::new(IngestionPipeline::new(store, pdf));

    let app = sources::router(pipeline, UploadOptions::from(&cfg.http));

    let addr: SocketAddr = cfg
        .http
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http.bind_addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "meter reading upload listener started");

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

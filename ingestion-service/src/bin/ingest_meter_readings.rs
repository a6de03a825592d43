use anyhow::{bail, Context, Result};
use reading_ingestion::{
    config::{AppConfig, IngestionConfig},
    observability,
    pipeline::{FileKind, IngestionPipeline},
    report::{FailureReport, IngestionSummary},
    sinks::{InMemoryReadingStore, PgReadingStore, ReadingStore},
    sources::Pdftotext,
    IngestError,
};
use sqlx::postgres::PgPoolOptions;
use std::{env, path::Path, sync::Arc, time::Duration};

const USAGE: &str = "usage: ingest_meter_readings <file> [--kind csv|pdf|json] [--dry-run]";

struct Args {
    file_path: String,
    kind: Option<FileKind>,
    dry_run: bool,
}

fn parse_args() -> Result<Args> {
    let mut file_path = None;
    let mut kind = None;
    let mut dry_run = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "--kind" => {
                let Some(value) = args.next() else {
                    bail!("--kind needs a value\n{USAGE}");
                };
                kind = Some(value.parse::<FileKind>()?);
            }
            other if other.starts_with("--") => bail!("unknown flag {other}\n{USAGE}"),
            other if file_path.is_none() => file_path = Some(other.to_string()),
            _ => bail!("{USAGE}"),
        }
    }

    let Some(file_path) = file_path else {
        bail!("{USAGE}");
    };
    Ok(Args {
        file_path,
        kind,
        dry_run,
    })
}

async fn run<S: ReadingStore>(
    pipeline: &IngestionPipeline<S>,
    buffer: &[u8],
    kind: FileKind,
    file_name: String,
    preview_limit: usize,
) -> Result<()> {
    match pipeline.ingest(buffer, kind).await {
        Ok(result) => {
            let summary = IngestionSummary::new(&result, preview_limit);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(IngestError::Parse(e)) => {
            let report = FailureReport::parse(&e, Some(file_name));
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            Err(e.into())
        }
        Err(IngestError::Store(e)) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args = parse_args()?;
    let file_name = Path::new(&args.file_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file_path.clone());
    let kind = match args.kind {
        Some(kind) => kind,
        None => FileKind::from_file_name(&file_name)?,
    };

    let buffer = tokio::fs::read(&args.file_path)
        .await
        .with_context(|| format!("failed to read {}", args.file_path))?;

    if args.dry_run {
        // A config file is optional here; only ingestion and preview settings apply.
        let cfg = AppConfig::load_optional()?;
        let ingestion = cfg.as_ref().map(|c| c.ingestion.clone()).unwrap_or_default();
        let preview_limit = cfg.as_ref().map_or(5, |c| c.http.preview_limit);

        let pipeline =
            IngestionPipeline::new(InMemoryReadingStore::new(), pdf_extractor(&ingestion));
        return run(&pipeline, &buffer, kind, file_name, preview_limit).await;
    }

    let cfg = AppConfig::load()?;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    if cfg.database.apply_schema {
        readings_client::db::apply_schema(&pool).await?;
    }

    let store = PgReadingStore::new(
        pool,
        cfg.ingestion.max_insert_retries,
        Duration::from_millis(cfg.ingestion.retry_backoff_ms),
    );
    let pipeline = IngestionPipeline::new(store, pdf_extractor(&cfg.ingestion));
    run(&pipeline, &buffer, kind, file_name, cfg.http.preview_limit).await
}

fn pdf_extractor(cfg: &IngestionConfig) -> Arc<Pdftotext> {
    Arc::new(Pdftotext::new(&cfg.pdftotext_program))
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::{
    config::HttpConfig,
    pipeline::{FileKind, IngestError, IngestionPipeline, MeterLocks},
    report::{FailureReport, IngestionSummary},
    sinks::ReadingStore,
};

/// Upload endpoint settings.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub auth_bearer_token: Option<String>,
    pub max_body_bytes: usize,
    pub preview_limit: usize,
}

impl From<&HttpConfig> for UploadOptions {
    fn from(cfg: &HttpConfig) -> Self {
        Self {
            auth_bearer_token: cfg.auth_bearer_token.clone(),
            max_body_bytes: cfg.max_body_bytes,
            preview_limit: cfg.preview_limit,
        }
    }
}

struct UploadState<S> {
    pipeline: Arc<IngestionPipeline<S>>,
    locks: MeterLocks,
    auth_bearer_token: Option<Arc<str>>,
    preview_limit: usize,
}

impl<S> Clone for UploadState<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            locks: self.locks.clone(),
            auth_bearer_token: self.auth_bearer_token.clone(),
            preview_limit: self.preview_limit,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct UploadQuery {
    kind: Option<String>,
    file_name: Option<String>,
}

/// `POST /ingest/meter_readings?kind=csv|pdf|json` (or `?file_name=...`)
/// with the raw file as the request body.
pub fn router<S>(pipeline: Arc<IngestionPipeline<S>>, options: UploadOptions) -> Router
where
    S: ReadingStore + 'static,
{
    let state = UploadState {
        pipeline,
        locks: MeterLocks::new(),
        auth_bearer_token: options.auth_bearer_token.map(Arc::from),
        preview_limit: options.preview_limit,
    };

    Router::new()
        .route("/ingest/meter_readings", post(ingest_meter_readings::<S>))
        .layer(DefaultBodyLimit::max(options.max_body_bytes))
        .with_state(state)
}

fn authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn resolve_kind(query: &UploadQuery) -> Option<Result<FileKind, crate::pipeline::ParseError>> {
    match (&query.kind, &query.file_name) {
        (Some(kind), _) => Some(kind.parse()),
        (None, Some(name)) => Some(FileKind::from_file_name(name)),
        (None, None) => None,
    }
}

async fn ingest_meter_readings<S>(
    State(state): State<UploadState<S>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: ReadingStore + 'static,
{
    metrics::counter!("http_ingest_requests_total").increment(1);

    if !authorized(&headers, state.auth_bearer_token.as_deref()) {
        metrics::counter!("http_ingest_unauthorized_total").increment(1);
        return (
            StatusCode::UNAUTHORIZED,
            Json(FailureReport::other("missing or invalid bearer token")),
        )
            .into_response();
    }

    let kind = match resolve_kind(&query) {
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(FailureReport::parse(&e, query.file_name.clone())),
            )
                .into_response()
        }
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(FailureReport::other("query must name the file kind or file_name")),
            )
                .into_response()
        }
    };

    tracing::info!(
        file_kind = %kind,
        file_name = ?query.file_name,
        bytes = body.len(),
        "reading file received"
    );

    let batch = match state.pipeline.prepare(&body, kind).await {
        Ok(batch) => batch,
        Err(e) => {
            metrics::counter!("http_ingest_failed_total").increment(1);
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(FailureReport::parse(&e, query.file_name.clone())),
            )
                .into_response();
        }
    };

    // One ingestion per meter at a time: existing dates must be read after
    // any earlier upload for the same meter has finished inserting.
    let _guard = state.locks.lock(&batch.meter_number).await;

    match state.pipeline.persist(batch).await {
        Ok(result) => (
            StatusCode::OK,
            Json(IngestionSummary::new(&result, state.preview_limit)),
        )
            .into_response(),
        Err(IngestError::Parse(e)) => {
            metrics::counter!("http_ingest_failed_total").increment(1);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(FailureReport::parse(&e, query.file_name.clone())),
            )
                .into_response()
        }
        Err(IngestError::Store(e)) => {
            metrics::counter!("http_ingest_failed_total").increment(1);
            tracing::error!(error = %e, "meter reading ingestion failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(FailureReport::other(e))).into_response()
        }
    }
}

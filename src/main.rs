mod ebay;
mod hosting;
mod http;
mod idempotency;
mod llm;
mod metrics;
mod models;
mod pipeline;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use eyre::WrapErr;
use idempotency::IdempotencyStore;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AnalysisResult, ApiError, BatchSummary, HostedPhoto, ListingDraft, MarketplaceResult, Photo,
    PostableListing, StageReport,
};
use pipeline::{LivePipeline, PipelineError, PipelineErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;
use std::net::SocketAddr;
use tokio::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "relay.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let pipeline = LivePipeline::from_env().wrap_err("loading mapping tables")?;
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;
    let state = AppState {
        pipeline,
        idempotency: IdempotencyStore::from_env(),
        prometheus_handle,
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "relay.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app(state).into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: LivePipeline,
    idempotency: IdempotencyStore,
    prometheus_handle: PrometheusHandle,
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/analyze", post(analyze))
        .route("/listings", post(create_listing))
        .route("/listings/extract", post(extract_listing))
        .route("/listings/batch", post(create_batch))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "listing-relay",
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64 * 1024 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    raw_response: String,
    hosted_photos: Vec<HostedPhoto>,
    draft: Option<ListingDraft>,
    parse_error: Option<String>,
    stages: Vec<StageReport>,
}

/// Analyze photos and host them in one round trip.
///
/// - Method: `POST`
/// - Path: `/analyze`
/// - Body: multipart with one or more `photos` file parts and a `prompt` text part
/// - Response: raw model text, per-photo hosting results and a best-effort draft
async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    crate::metrics::inc_requests("/analyze");
    let mut photos = Vec::new();
    let mut prompt = String::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| PipelineError::invalid_input("analyze", err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "photos" | "photo" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let mime_type = field.content_type().unwrap_or("image/jpeg").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| PipelineError::invalid_input("analyze", err.body_text()))?;
                photos.push(Photo::new(data.to_vec(), filename, mime_type));
            }
            "prompt" => {
                prompt = field
                    .text()
                    .await
                    .map_err(|err| PipelineError::invalid_input("analyze", err.body_text()))?;
            }
            other => debug!(target = "relay.api", field = %other, "ignoring multipart field"),
        }
    }

    let AnalysisResult {
        raw_response,
        hosted_photos,
        stages,
    } = state.pipeline.analyze(&photos, &prompt).await?;
    let (draft, parse_error) = match state.pipeline.extract_listing(&raw_response) {
        Ok(draft) => (Some(draft), None),
        Err(err) => (None, Some(err.detail().to_string())),
    };
    Ok(Json(AnalyzeResponse {
        raw_response,
        hosted_photos,
        draft,
        parse_error,
        stages,
    }))
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    #[serde(alias = "rawResponse")]
    raw_response: String,
}

/// Turn raw model text into a listing draft.
///
/// - Method: `POST`
/// - Path: `/listings/extract`
/// - Response: `ListingDraft`, or 422 when the text holds no usable JSON object
async fn extract_listing(
    State(state): State<AppState>,
    Json(payload): Json<ExtractRequest>,
) -> Result<Json<ListingDraft>, AppError> {
    crate::metrics::inc_requests("/listings/extract");
    Ok(Json(state.pipeline.extract_listing(&payload.raw_response)?))
}

/// Post one listing to the marketplace.
///
/// - Method: `POST`
/// - Path: `/listings`
/// - Headers: optional `Idempotency-Key`
/// - Body: `{draft, photo_urls}`
/// - Response: `MarketplaceResult`, or 409 while the same key is still posting
async fn create_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PostableListing>,
) -> Result<Json<MarketplaceResult>, AppError> {
    crate::metrics::inc_requests("/listings");

    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let post = state.pipeline.post_listing(&payload);
    let result = match &key {
        Some(key) => state.idempotency.once(key, post).await?,
        None => post.await?,
    };
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    listings: Vec<PostableListing>,
    #[serde(default, alias = "chunkSize")]
    chunk_size: Option<usize>,
    #[serde(default, alias = "delayMs")]
    delay_ms: Option<u64>,
}

/// Post several listings concurrently.
///
/// - Method: `POST`
/// - Path: `/listings/batch`
/// - Body: `{listings, chunk_size?, delay_ms?}`
/// - Response: batch summary with one entry per listing, in input order
async fn create_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchSummary>, AppError> {
    crate::metrics::inc_requests("/listings/batch");
    let summary = match payload.chunk_size {
        Some(chunk_size) => {
            let delay = Duration::from_millis(payload.delay_ms.unwrap_or(0));
            state
                .pipeline
                .post_all_chunked(&payload.listings, chunk_size, delay)
                .await?
        }
        None => state.pipeline.post_all(&payload.listings).await?,
    };
    Ok(Json(summary))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Parse => StatusCode::UNPROCESSABLE_ENTITY,
                    PipelineErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::Conflict => StatusCode::CONFLICT,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if let Some(raw) = err.raw() {
                    debug!(target = "relay.api", stage = err.stage(), raw = %raw, "unparsed model response");
                }
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let state = AppState {
            pipeline: LivePipeline::from_env().expect("pipeline"),
            idempotency: IdempotencyStore::memory(Duration::from_secs(60)),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        };
        app(state)
    }

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = test_app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, body) = send(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn extract_returns_draft() {
        let raw = r#"Sure! {"title": "Lamp", "price": "$20", "condition": "Used"}"#;
        let (status, body) = send(post_json(
            "/listings/extract",
            json!({ "raw_response": raw }),
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Lamp");
        assert_eq!(body["price"], 20.0);
    }

    #[tokio::test]
    async fn extract_of_prose_is_unprocessable() {
        let (status, body) = send(post_json(
            "/listings/extract",
            json!({ "raw_response": "not json" }),
        ))
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "extract_listing");
    }

    #[tokio::test]
    async fn empty_batch_is_bad_request() {
        let (status, body) = send(post_json("/listings/batch", json!({ "listings": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "post_all");
    }

    #[tokio::test]
    async fn listing_without_photos_is_bad_request() {
        let (status, body) = send(post_json(
            "/listings",
            json!({
                "draft": { "title": "Lamp", "price": 20.0 },
                "photo_urls": []
            }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "post_listing");
    }

    #[tokio::test]
    async fn rejected_listing_does_not_hold_its_idempotency_key() {
        let app = test_app();
        for _ in 0..2 {
            let mut request = post_json(
                "/listings",
                json!({
                    "draft": { "title": "Lamp", "price": 20.0 },
                    "photo_urls": []
                }),
            );
            request
                .headers_mut()
                .insert("Idempotency-Key", "lamp-1".parse().unwrap());
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn in_flight_key_maps_to_conflict() {
        let response = AppError::from(PipelineError::conflict("idempotency", "busy")).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn analyze_without_photos_is_bad_request() {
        let boundary = "relayboundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"prompt\"\r\n\r\nList this\r\n--{boundary}--\r\n"
        );
        let (status, body) = send(
            Request::builder()
                .method("POST")
                .uri("/analyze")
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validate");
    }
}

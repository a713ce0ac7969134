mod http;
mod idempotency;
mod jobs;
mod metrics;
mod models;
mod normalize;
mod pipeline;
mod prompt;
mod providers;
mod security;
mod shipping;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{AnalysisRequest, AnalyzeResponse, ApiError};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "snaplist.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let pipeline = Pipeline::from_env();
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let openapi: serde_json::Value =
        serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|url| redis::Client::open(url).ok());
    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(idempotency::MemoryCache::new()),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/analyze", post(analyze))
        .nest(
            "/stages",
            Router::new()
                .route("/prompt", post(stage_prompt))
                .route("/normalize", post(stage_normalize))
                .route("/classify", post(stage_classify)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/analyze", post(enqueue_analysis))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "snaplist.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<idempotency::MemoryCache>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "snaplist-api",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Pipeline(PipelineError::invalid_input(
                "docs",
                "unauthorized",
            )));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Snaplist API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

// Requests carry base64 photos, so the default cap is well above axum's 2 MB.
fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(8 * 1024 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

/// Run the photos → marketplace listing pipeline.
///
/// - Method: `POST`
/// - Path: `/analyze`
/// - Auth: `Authorization: Bearer <key>` or `X-Snaplist-Key: <key>`
/// - Body: `AnalysisRequest`
/// - Response: `AnalyzeResponse` (canonical listing + per-stage transcript)
async fn analyze(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<AnalysisRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    crate::metrics::inc_requests("/analyze");
    info!(
        target = "snaplist.api",
        org_id = %context.org_id,
        api_key = %context.api_key_id,
        image_count = payload.images.len(),
        "analysis pipeline invoked",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        let ttl = idempotency::ttl_from_env();
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let response = state.pipeline.run(payload).await?;
            idempotency::redis_set(client, &key, &response, ttl.as_secs()).await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.get(&key, ttl).await {
            return Ok(Json(existing));
        }
        let response = state.pipeline.run(payload).await?;
        state.idempotency.insert(key, response.clone(), ttl).await;
        return Ok(Json(response));
    }

    let response = state.pipeline.run(payload).await?;
    Ok(Json(response))
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
                    PipelineErrorKind::Config => StatusCode::SERVICE_UNAVAILABLE,
                    PipelineErrorKind::AllProvidersFailed => StatusCode::BAD_GATEWAY,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    details: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_analysis(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<AnalysisRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/analyze");
    let id = state
        .queue
        .enqueue(payload, context)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "not_found",
        )))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

// -------- Stage endpoints (manual granular control) --------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptRequest {
    #[serde(default)]
    extra_info: Option<String>,
    #[serde(default = "default_true")]
    is_spicy_mode: bool,
    #[serde(default = "default_region")]
    region: String,
    #[serde(default)]
    is_premium: bool,
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "UK".to_string()
}

#[derive(Debug, Serialize)]
struct PromptResponse {
    instruction: String,
}

async fn stage_prompt(Json(req): Json<PromptRequest>) -> Json<PromptResponse> {
    crate::metrics::inc_requests("/stages/prompt");
    let config = prompt::PromptConfig {
        region: req.region,
        extra_info: req.extra_info,
        spicy_mode: req.is_spicy_mode,
        premium: req.is_premium,
    };
    Json(PromptResponse {
        instruction: prompt::build_instruction(&config),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NormalizeRequest {
    raw_text: String,
    #[serde(default = "default_true")]
    is_spicy_mode: bool,
}

async fn stage_normalize(
    Json(req): Json<NormalizeRequest>,
) -> Result<Json<models::DraftListing>, AppError> {
    crate::metrics::inc_requests("/stages/normalize");
    let draft = normalize::normalize_listing(&req.raw_text, req.is_spicy_mode)
        .map_err(|err| PipelineError::invalid_input("normalize", err.to_string()))?;
    Ok(Json(draft))
}

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    dimensions: models::Dimensions,
    weight: models::Weight,
    fragility: models::Fragility,
}

async fn stage_classify(
    Json(req): Json<ClassifyRequest>,
) -> Json<shipping::PackagingRecommendation> {
    crate::metrics::inc_requests("/stages/classify");
    Json(shipping::recommend_packaging(
        &req.dimensions,
        &req.weight,
        req.fragility,
    ))
}

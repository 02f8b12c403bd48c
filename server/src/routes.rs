use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream, Stream, StreamExt};
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use llm_core::{relay_prompt, CompletionSource, RelayEvent};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::{MetricsResponse, RelayMetrics, SystemMetrics};
use crate::validation::validate_stream_request;

#[derive(Clone)]
pub struct AppState {
    pub completion: Arc<dyn CompletionSource>,
    pub config: ServerConfig,
    pub metrics: RelayMetrics,
}

impl AppState {
    pub fn new(completion: Arc<dyn CompletionSource>, config: ServerConfig) -> Self {
        Self {
            completion,
            config,
            metrics: RelayMetrics::new(),
        }
    }
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let system = SystemMetrics::collect(state.metrics.uptime_seconds());
    Json(state.metrics.snapshot(system))
}

/// Relay a prompt's completion as sentence-sized SSE events.
///
/// Validation failures are the only non-200 outcome; once the event stream
/// has started, upstream failures are reported in-band as `event: error`.
pub async fn stream_endpoint(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let prompt = match validate_stream_request(&body) {
        Ok(prompt) => prompt,
        Err(e) => {
            state.metrics.record_rejected();
            return Err(e);
        }
    };

    info!(chars = prompt.chars().count(), "stream request received");
    state.metrics.record_started();

    let received = Instant::now();
    let idle_timeout = state.config.llm_timeout();
    let completion = state.completion.clone();
    let metrics = state.metrics.clone();
    let mut chunks_sent = 0u64;

    let events = stream::once(async move { completion.stream(&prompt).await })
        .flat_map(move |opened| relay_prompt(opened, idle_timeout))
        .map(move |event| {
            metrics.observe(&event, received, chunks_sent);
            if let RelayEvent::Chunk(_) = event {
                chunks_sent += 1;
            }
            Ok::<_, Infallible>(to_sse_event(&event))
        });

    Ok(Sse::new(events))
}

fn to_sse_event(event: &RelayEvent) -> Event {
    let (name, data) = event.to_wire();
    match name {
        Some(name) => Event::default().event(name).data(data),
        None => Event::default().data(data),
    }
}

async fn not_found() -> ApiError {
    ApiError::NotFound("No such route".to_string())
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError::InternalError(format!("handler panicked: {detail}")).into_response()
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        if config.cors_allowed_origins.is_some() {
            warn!("CORS_ALLOWED_ORIGINS has no valid origin, falling back to permissive CORS");
        } else {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        }
        AllowOrigin::from(cors::Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers(cors::Any)
        .allow_credentials(false)
}

/// Routes served both at the root and under `/api`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/stream", post(stream_endpoint))
        .route("/metrics", get(metrics_endpoint));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .fallback(not_found)
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}

/// The relay application with its full middleware stack.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    let config = state.config.clone();

    // Global key: every client shares one bucket, which also works behind proxies.
    let per_second = u64::from((config.rate_limit_per_minute / 60).max(1));
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(per_second)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    Ok(router(state).layer(middleware_stack))
}

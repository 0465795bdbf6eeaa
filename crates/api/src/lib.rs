mod rate_limit;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Json, Path as AxumPath, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wayfinder_agents::{
    GeminiClient, GeminiConfig, NominatimClient, NominatimConfig, PlannerError, TripPlanner,
    DEFAULT_SESSION_TTL_SECONDS,
};
use wayfinder_core::{parse_itinerary, ConversationSession, Message, UserInput};
use wayfinder_observability::AppMetrics;
use wayfinder_storage::MemoryStore;

use crate::rate_limit::IpRateLimiter;

const DEFAULT_API_KEY: &str = "dev-wayfinder-key";
const DEFAULT_PLACE_LIMIT: usize = 5;
const MAX_PLACE_LIMIT: usize = 20;
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub type Planner = TripPlanner<GeminiClient, NominatimClient, MemoryStore>;

/// Runtime settings for the HTTP surface, normally read from `WAYFINDER_*` variables.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub gemini: GeminiConfig,
    pub geocoder: NominatimConfig,
    pub session_ttl: Duration,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub allowed_origins: Vec<String>,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("WAYFINDER_API_KEY").unwrap_or_else(|_| DEFAULT_API_KEY.to_string()),
            gemini: GeminiConfig::from_env(),
            geocoder: NominatimConfig::from_env(),
            session_ttl: Duration::from_secs(env_number(
                "WAYFINDER_SESSION_TTL_SECONDS",
                DEFAULT_SESSION_TTL_SECONDS as u64,
            )),
            rate_limit_window: Duration::from_secs(env_number(
                "WAYFINDER_API_RATE_LIMIT_WINDOW_SECONDS",
                60,
            )),
            rate_limit_max: env_number("WAYFINDER_API_RATE_LIMIT_MAX", 80),
            allowed_origins: parse_origin_list(env::var("WAYFINDER_ALLOWED_ORIGINS").ok().as_deref()),
        }
    }
}

fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Clone)]
pub struct ApiState {
    pub planner: Arc<Planner>,
    pub metrics: Arc<AppMetrics>,
    pub api_key: String,
    pub limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: wayfinder_observability::MetricsSnapshot,
    capabilities: HealthCapabilities,
}

#[derive(Debug, Serialize)]
struct HealthCapabilities {
    itinerary_generation: bool,
    generation_model: String,
    place_search: bool,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    text: Option<String>,
    option: Option<String>,
}

impl MessageRequest {
    fn into_input(self) -> Option<UserInput> {
        match (self.option, self.text) {
            (Some(option), _) => Some(UserInput::Option(option)),
            (None, Some(text)) => Some(UserInput::Text(text)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct TurnResponse {
    session: ConversationSession,
    reply: Message,
}

#[derive(Debug, Deserialize)]
struct MapQuery {
    zoom: Option<u8>,
    /// Itinerary day whose activities are pinned; the destination alone when absent.
    day: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ParseRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct PlaceSearchQuery {
    q: String,
    limit: Option<usize>,
}

pub async fn build_app() -> Result<Router> {
    build_app_with(ApiConfig::from_env()).await
}

pub async fn build_app_with(config: ApiConfig) -> Result<Router> {
    let metrics = AppMetrics::shared();

    let generation =
        GeminiClient::new(config.gemini.clone()).context("failed to initialize generation client")?;
    let places = Arc::new(
        NominatimClient::new(config.geocoder.clone()).context("failed to initialize geocoder")?,
    );
    let session_ttl = chrono::Duration::from_std(config.session_ttl)
        .context("session ttl is out of range")?;

    let planner = Arc::new(TripPlanner::new(
        generation,
        places,
        Arc::new(MemoryStore::new()),
        metrics.clone(),
        session_ttl,
    ));

    tokio::spawn(sweep_expired_sessions(
        Arc::clone(&planner),
        SESSION_SWEEP_INTERVAL,
    ));

    info!(
        generation_configured = planner.generation_service().is_configured(),
        model = planner.generation_service().model(),
        geocoder = %config.geocoder.base_url,
        "trip planner initialized"
    );

    let state = ApiState {
        planner,
        metrics,
        api_key: config.api_key,
        limiter: IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        allowed_origins: Arc::new(config.allowed_origins),
    };

    Ok(build_router(state))
}

async fn sweep_expired_sessions(planner: Arc<Planner>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(error) = planner.purge_expired_sessions().await {
            error!(%error, "failed to purge expired sessions");
        }
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/{session_id}", get(get_session))
        .route("/v1/sessions/{session_id}/messages", post(post_message))
        .route("/v1/sessions/{session_id}/itinerary", get(get_itinerary))
        .route(
            "/v1/sessions/{session_id}/itinerary/export",
            get(export_itinerary),
        )
        .route("/v1/sessions/{session_id}/map", get(get_map))
        .route("/v1/itinerary/parse", post(parse_itinerary_text))
        .route("/v1/places/search", get(search_places))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let generation = state.planner.generation_service();
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        metrics: state.metrics.snapshot(),
        capabilities: HealthCapabilities {
            itinerary_generation: generation.is_configured(),
            generation_model: generation.model().to_string(),
            place_search: true,
        },
    };
    (StatusCode::OK, Json(payload))
}

async fn create_session(State(state): State<ApiState>) -> Response {
    match state.planner.start_session().await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(error) => planner_error_response(error),
    }
}

async fn get_session(
    State(state): State<ApiState>,
    AxumPath(session_id): AxumPath<String>,
) -> Response {
    match state.planner.session(&session_id).await {
        Ok(session) => Json(session).into_response(),
        Err(error) => planner_error_response(error),
    }
}

async fn post_message(
    State(state): State<ApiState>,
    AxumPath(session_id): AxumPath<String>,
    Json(request): Json<MessageRequest>,
) -> Response {
    let Some(input) = request.into_input() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_message",
            "provide either `text` or `option`",
        );
    };

    match state.planner.handle_turn(&session_id, input).await {
        Ok(turn) => Json(TurnResponse {
            session: turn.session,
            reply: turn.reply,
        })
        .into_response(),
        Err(error) => planner_error_response(error),
    }
}

async fn get_itinerary(
    State(state): State<ApiState>,
    AxumPath(session_id): AxumPath<String>,
) -> Response {
    match state.planner.itinerary(&session_id).await {
        Ok(itinerary) => Json(itinerary).into_response(),
        Err(error) => planner_error_response(error),
    }
}

async fn export_itinerary(
    State(state): State<ApiState>,
    AxumPath(session_id): AxumPath<String>,
) -> Response {
    let export = match state.planner.export_document(&session_id).await {
        Ok(export) => export,
        Err(error) => return planner_error_response(error),
    };

    let disposition = format!("attachment; filename=\"{}\"", export.file_name);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Err(_) => {
            headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=\"trip-itinerary.txt\""),
            );
        }
    }

    (StatusCode::OK, headers, export.document).into_response()
}

async fn get_map(
    State(state): State<ApiState>,
    AxumPath(session_id): AxumPath<String>,
    Query(query): Query<MapQuery>,
) -> Response {
    match state.planner.map_view(&session_id, query.day).await {
        Ok(mut view) => {
            if let Some(zoom) = query.zoom {
                view.set_zoom(zoom);
            }
            Json(view).into_response()
        }
        Err(error) => planner_error_response(error),
    }
}

async fn parse_itinerary_text(Json(request): Json<ParseRequest>) -> Response {
    Json(parse_itinerary(&request.text)).into_response()
}

async fn search_places(
    State(state): State<ApiState>,
    Query(query): Query<PlaceSearchQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PLACE_LIMIT)
        .clamp(1, MAX_PLACE_LIMIT);
    Json(state.planner.search_places(&query.q, limit).await).into_response()
}

fn planner_error_response(error: PlannerError) -> Response {
    match &error {
        PlannerError::SessionNotFound(_) => {
            error_response(StatusCode::NOT_FOUND, "session_not_found", &error.to_string())
        }
        PlannerError::GenerationInFlight(_) => {
            error_response(StatusCode::CONFLICT, "generation_in_flight", &error.to_string())
        }
        PlannerError::NoItinerary(_) => {
            error_response(StatusCode::NOT_FOUND, "itinerary_not_ready", &error.to_string())
        }
        PlannerError::DayNotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, "day_not_found", &error.to_string())
        }
        PlannerError::Storage(inner) => {
            error!(error = %inner, "planner storage failure");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "the request could not be completed",
            )
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message
        })),
    )
        .into_response()
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if header_key == state.api_key || request_origin_is_allowed(&state, request.headers()) {
        return next.run(request).await;
    }

    error_response(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "missing or invalid x-api-key, and request origin is not allowed",
    )
}

fn request_origin_is_allowed(state: &ApiState, headers: &HeaderMap) -> bool {
    headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter(|origin| !origin.is_empty())
        .is_some_and(|origin| state.allowed_origins.iter().any(|value| value == origin))
}

fn parse_origin_list(raw: Option<&str>) -> Vec<String> {
    let default_origins = [
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    raw.map(|value| {
        value
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect::<Vec<_>>()
    })
    .unwrap_or_else(|| {
        default_origins
            .iter()
            .map(|value| value.to_string())
            .collect()
    })
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health")
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:5173")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
        .expose_headers([header::CONTENT_DISPOSITION])
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if !state.limiter.allow(&ip) {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "rate limit exceeded for this IP",
        );
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "local".to_string())
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'; base-uri 'none'"),
    );

    response
}

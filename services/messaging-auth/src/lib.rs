pub mod check;
pub mod config;
pub mod error;

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use check::check_password;
use common_auth::AuthenticationService;
use common_obs::{
    encode_prometheus, handler_latency_seconds, health_router, http_requests_total,
    PROMETHEUS_CONTENT_TYPE,
};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const SERVICE_NAME: &str = "messaging-auth";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<dyn AuthenticationService>,
    /// Upper bound on a single token validation.
    pub validation_timeout: Duration,
}

impl AppState {
    pub fn new(auth: Arc<dyn AuthenticationService>, validation_timeout: Duration) -> Self {
        Self {
            auth,
            validation_timeout,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(check_password))
        .route("/metrics", get(metrics))
        .merge(health_router(SERVICE_NAME))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn(request_context))
        .with_state(state)
}

/// A panicking handler or authentication backend answers a bare `500`.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "request handler panicked");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    // Path only: the query string carries the token.
    let path = req.uri().path().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let request_id = match req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };

    let span = info_span!(
        "http.request",
        method = %method,
        path = %path,
        request_id = %request_id
    );

    let start = Instant::now();
    let mut response = async {
        tracing::info!(
            event = "request_start",
            user_agent = user_agent.as_str()
        );
        let response = next.run(req).await;
        let status = response.status();
        let latency = start.elapsed().as_secs_f64();
        tracing::info!(
            event = "request_end",
            status = status.as_u16(),
            latency_ms = latency * 1000.0
        );

        http_requests_total().inc(&[SERVICE_NAME, route.as_str(), status.as_str()], 1);
        handler_latency_seconds().observe(&[SERVICE_NAME, route.as_str()], latency);
        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        )],
        encode_prometheus(),
    )
}

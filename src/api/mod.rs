use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::AppState;

pub mod handlers;

/// Request bodies here are small JSON documents; reports are the largest.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full HTTP application: health probes, metrics, and the
/// authenticated notification/report API.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/notifications", post(handlers::enqueue_notification))
        .route("/notifications/reserve", post(handlers::reserve_notifications))
        .route("/notifications/success", post(handlers::report_outcome))
        .route(
            "/notifications/user/:user_id",
            get(handlers::list_user_notifications),
        )
        .route("/reports", post(handlers::create_report))
        .route("/reports/user/:user_id", get(handlers::list_user_reports))
        .layer(middleware::from_fn_with_state(state.clone(), api_key_auth));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(protected)
        .fallback(fallback_404)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.dashboard_origin.clone()))
        .layer(middleware::from_fn(request_id_middleware))
}

async fn fallback_404() -> AppError {
    AppError::NotFound("route".into())
}

fn cors_layer(dashboard_origin: Option<String>) -> CorsLayer {
    use axum::http::{HeaderName, Method};

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            dashboard_origin.as_deref() == Some(origin_str)
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-request-id"),
        ])
}

/// Middleware: validates `X-API-Key` against the configured key.
/// A server without a configured key accepts every request.
async fn api_key_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match provided {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected.as_bytes())) => next.run(req).await,
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "api: invalid X-API-Key");
            AppError::Unauthorized("Invalid API key").into_response()
        }
        None => {
            tracing::warn!(path = %req.uri().path(), "api: missing X-API-Key header");
            AppError::Unauthorized("Missing X-API-Key header").into_response()
        }
    }
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

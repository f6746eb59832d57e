//! Middleware Components
//!
//! CORS, request tracking and request counting.

use super::handlers::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, ExposeHeaders};
use uuid::Uuid;

/// Request ID header key
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller identity set by the upstream auth gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Create CORS middleware with configurable origins
pub fn create_cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    let expose = ExposeHeaders::list([HeaderName::from_static(REQUEST_ID_HEADER)]);
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        // Development mode: allow all origins
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(expose)
    } else {
        CorsLayer::new()
            .allow_origin(
                allowed_origins
                    .into_iter()
                    .filter_map(|o| o.parse::<HeaderValue>().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any)
            .expose_headers(expose)
    }
}

/// Middleware to add request ID to all requests
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    // Check if request already has an ID from client
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Count every request for `/metrics`
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    state.metrics.record_http_request();
    next.run(request).await
}

/// Request ID wrapper for extracting in handlers
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

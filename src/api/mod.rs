// HTTP surface: health, current principal, and the channel upgrade

mod ws;

use axum::{
    Extension, Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::auth::{AuthError, Authenticator, RequestContext, unix_now};
use crate::channel::ChannelServices;

pub use ws::STOMP_SUBPROTOCOL;

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub channels: Arc<ChannelServices>,
}

impl AppState {
    pub fn new(authenticator: Arc<Authenticator>, channels: Arc<ChannelServices>) -> Self {
        Self {
            authenticator,
            channels,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        }));
        (self.status_code(), body).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    // Channels authenticate on their CONNECT frame, not on the upgrade request
    let authenticated = Router::new()
        .route("/api/me", get(current_principal))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .merge(authenticated)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Attach a [`RequestContext`] to the request, or answer 401/503.
async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let headers = request.headers();
    let ip_address =
        header_string(headers, "x-forwarded-for").or_else(|| header_string(headers, "x-real-ip"));
    let user_agent = header_string(headers, "user-agent");

    let ctx = state
        .authenticator
        .authenticate_request(headers, unix_now(), ip_address, user_agent)
        .await?;

    debug!(
        request_id = %ctx.request_id(),
        user = %ctx.display(),
        "Request authenticated"
    );
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// The principal of the calling request. Anonymous callers get 401.
async fn current_principal(
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Value>, AuthError> {
    let principal = ctx.require_principal()?;
    Ok(Json(serde_json::json!({
        "id": principal.id(),
        "username": principal.username(),
        "display_name": principal.display_name(),
        "avatar_url": principal.avatar_url(),
    })))
}

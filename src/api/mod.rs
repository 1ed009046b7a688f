use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::middleware::gate::require_credential;
use crate::AppState;

pub mod extract;
pub mod gateway;
pub mod handlers;

/// Full application router: health, session bootstrap, the session-gated
/// management API under `/api/v1`, and the credential-gated data plane
/// under `/v1`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/auth/session", post(handlers::create_session))
        .nest("/api/v1", api_router(state.clone()))
        .nest("/v1", gateway_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state)
}

/// Credential management. All routes are relative, mounted under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/credentials",
            get(handlers::list_credentials).post(handlers::create_credential),
        )
        .route(
            "/credentials/:id",
            get(handlers::get_credential)
                .patch(handlers::update_permissions)
                .delete(handlers::delete_credential),
        )
        .route("/credentials/:id/revoke", post(handlers::revoke_credential))
        .route_layer(middleware::from_fn_with_state(state, session_auth))
        .layer(TraceLayer::new_for_http())
}

/// Data-plane routes behind the authorization gate.
pub fn gateway_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth", get(gateway::current_auth))
        .route("/authorize", post(gateway::authorize_capabilities))
        .route_layer(middleware::from_fn_with_state(state, require_credential))
        .layer(TraceLayer::new_for_http())
}

async fn fallback_404() -> AppError {
    AppError::RouteNotFound
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> StatusCode {
    match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => StatusCode::OK,
            Err(e) => {
                tracing::warn!("readiness: database unreachable: {}", e);
                StatusCode::SERVICE_UNAVAILABLE
            }
        },
        None => StatusCode::OK,
    }
}

/// Middleware: accepts a session token as `Authorization: Bearer <token>`
/// or in the session cookie, and stores the verified payload in request
/// extensions.
async fn session_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = session_token(req.headers(), &state.config.session_cookie);

    let Some(token) = token else {
        tracing::debug!("management API: missing session");
        return AppError::Unauthorized.into_response();
    };

    match state.sessions.verify(&token) {
        Some(session) => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        None => {
            tracing::warn!("management API: invalid or expired session token");
            AppError::Unauthorized.into_response()
        }
    }
}

/// Bearer header first, then the named cookie.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, t)| t.trim())
        .filter(|t| !t.is_empty());
    if let Some(t) = bearer {
        return Some(t.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

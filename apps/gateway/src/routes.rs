//! Router composition (C7). Route groups are layered from the outside in:
//! `health_guard` (liveness) wraps everything, `identify_guard` resolves
//! whatever identity the request carries, and `require_auth_guard` /
//! `require_owner_guard` reject unauthenticated/under-privileged requests
//! on the groups that need it. Remember: the first `.layer()` call is
//! outermost and runs first.

use axum::http::{HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::handlers::{auth, networks, notifications, proxy, telemetry, webhooks};
use crate::middleware::{csrf_guard, health_guard, identify_guard, require_auth_guard, require_owner_guard, require_service_guard};
use crate::state::AppState;

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/setup/status", get(auth::setup_status))
        .route("/api/auth/setup/owner", post(auth::setup_owner))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/verify", post(auth::verify))
        .route("/api/auth/invite/verify/:token", get(auth::verify_invite))
        .route("/api/auth/invite/accept", post(auth::accept_invite))
        .route("/api/webhooks/clerk", post(webhooks::clerk_webhook))
}

fn authenticated_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/session", get(auth::session))
        .route("/api/auth/me", get(auth::me).put(auth::update_me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/health/*rest", get(proxy::proxy_health).post(proxy::proxy_health))
        .route("/api/metrics/snapshot", get(proxy::proxy_metrics_snapshot))
        .route("/api/assistant/*rest", get(proxy::proxy_assistant).post(proxy::proxy_assistant))
        .route("/api/networks", get(networks::list_networks).post(networks::create_network))
        .route(
            "/api/networks/:network_id",
            get(networks::get_network).put(networks::update_network).delete(networks::delete_network),
        )
        .route("/api/networks/:network_id/permissions", get(networks::list_permissions).post(networks::grant_permission))
        .route("/api/networks/:network_id/permissions/:target_user_id", delete(networks::revoke_permission))
        .route(
            "/api/notifications/preferences/:network_id",
            get(notifications::get_network_preferences)
                .put(notifications::put_network_preferences)
                .delete(notifications::delete_network_preferences),
        )
        .route(
            "/api/notifications/global/preferences",
            get(notifications::get_global_preferences).put(notifications::put_global_preferences).delete(notifications::delete_global_preferences),
        )
        .route("/api/notifications/test", post(notifications::send_test_notification))
        .merge(editor_routes())
        .merge(owner_routes())
        .merge(service_routes())
}

/// Service-to-service routes, never reachable with a user session.
fn service_routes() -> Router<AppState> {
    Router::new()
        .route("/api/internal/health-samples", post(telemetry::ingest_health_sample))
        .layer(from_fn(require_service_guard))
}

/// Silencing devices is a write operation gated at EDITOR/OWNER, layered
/// on top of (not instead of) plain authentication.
fn editor_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/silenced-devices/:network_id", get(notifications::list_silenced_devices).post(notifications::silence_device))
        .route("/api/notifications/silenced-devices/:network_id/:device_ip", delete(notifications::unsilence_device))
        .layer(from_fn(require_editor_guard))
}

async fn require_editor_guard(req: axum::extract::Request, next: axum::middleware::Next) -> axum::response::Response {
    use axum::response::IntoResponse;

    use crate::error::ApiError;
    use crate::middleware::AuthenticatedUser;

    match req.extensions().get::<AuthenticatedUser>() {
        Some(user) if user.is_editor_or_above() => next.run(req).await,
        Some(_) => ApiError::Forbidden.into_response(),
        None => ApiError::Unauthenticated.into_response(),
    }
}

fn owner_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/users", get(auth::list_users).post(auth::create_user))
        .route("/api/auth/users/:user_id", put(auth::update_user).delete(auth::delete_user))
        .route("/api/auth/invites", get(auth::list_invites).post(auth::create_invite))
        .route("/api/auth/invites/:invite_id", delete(auth::revoke_invite))
        .route("/api/notifications/broadcast", get(notifications::list_broadcasts).post(notifications::create_broadcast))
        .route(
            "/api/notifications/scheduled/:broadcast_id",
            put(notifications::update_broadcast).delete(notifications::delete_broadcast).post(notifications::cancel_broadcast),
        )
        .route("/api/notifications/version/status", get(notifications::version_status))
        .route("/api/notifications/service-status", get(notifications::service_status))
        .layer(from_fn(require_owner_guard))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let values: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(values)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

pub fn create_router(state: AppState) -> Router {
    let api = public_routes().merge(authenticated_routes().layer(from_fn(require_auth_guard)));

    Router::new()
        .merge(api)
        .fallback_service(crate::handlers::spa::service())
        .layer(cors_layer(&state.settings.cors_origins))
        .layer(from_fn_with_state(state.clone(), health_guard))
        .layer(from_fn_with_state(state.clone(), identify_guard))
        .layer(from_fn(csrf_guard))
        .with_state(state)
}

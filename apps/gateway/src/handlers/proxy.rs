//! Upstream passthrough for the health, metrics, and assistant services
//! (C7's proxy behavior): forwards the minimal header set and relays the
//! upstream's status/body verbatim.

use axum::body::{Body, Bytes};
use axum::extract::{Extension, Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use fabric_infra_upstream::RequestOptions;
use reqwest::Method as ReqwestMethod;

use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

/// Sub-paths under `/api/assistant/*` that require EDITOR/OWNER, gated by
/// method since a GET against the same path is read-only.
const ASSISTANT_WRITE_GATES: &[(&str, &str)] =
    &[("POST", "snapshot/generate"), ("POST", "snapshot/publish"), ("POST", "config"), ("POST", "speed-test")];

fn to_reqwest_method(method: &Method) -> ReqwestMethod {
    ReqwestMethod::from_bytes(method.as_str().as_bytes()).unwrap_or(ReqwestMethod::GET)
}

async fn forward(state: &AppState, user: Option<&AuthenticatedUser>, upstream: &str, method: Method, path: &str, body: Bytes) -> Result<Response, ApiError> {
    let service_token = state.token_authority.cached_service_token("gateway").await?;
    let mut headers = vec![("Authorization".to_string(), format!("Bearer {service_token}"))];
    if let Some(user) = user {
        if let Some(user_id) = user.user_id {
            headers.push(("X-User-Id".to_string(), user_id.to_string()));
        }
        if let Some(username) = &user.username {
            headers.push(("X-Username".to_string(), username.clone()));
        }
    }

    let options = RequestOptions {
        headers,
        body: (!body.is_empty()).then(|| body.to_vec()),
        timeout: std::time::Duration::from_secs(30),
    };

    let response = state.upstreams.request(upstream, to_reqwest_method(&method), path, options).await?;
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let bytes = response.bytes().await.map_err(|err| ApiError::Internal(err.into()))?;
    Ok((status, Body::from(bytes)).into_response())
}

pub async fn proxy_health(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    method: Method,
    body: Bytes,
) -> Result<Response, ApiError> {
    forward(&state, None, "health", method, &format!("/{rest}"), body).await
}

pub async fn proxy_metrics_snapshot(State(state): State<AppState>, method: Method, body: Bytes) -> Result<Response, ApiError> {
    forward(&state, None, "metrics", method, "/snapshot", body).await
}

pub async fn proxy_assistant(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(rest): Path<String>,
    method: Method,
    body: Bytes,
) -> Result<Response, ApiError> {
    let requires_editor = ASSISTANT_WRITE_GATES.iter().any(|(m, p)| *m == method.as_str() && rest.trim_start_matches('/') == *p);
    if requires_editor && !user.is_editor_or_above() {
        return Err(ApiError::Forbidden);
    }
    forward(&state, Some(&user), "assistant", method, &format!("/{rest}"), body).await
}

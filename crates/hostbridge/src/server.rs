//! Loopback HTTP binding
//!
//! Routes decode requests, pull credentials out of headers and hand
//! everything to the [`Daemon`]; no policy decisions are made here.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::command::{CommandRequest, CommandResponse};
use crate::confirm::ConfirmationEntry;
use crate::daemon::{Daemon, PairRequest, PairResponse, ResolveRequest};
use crate::error::{BridgeError, ErrorCode};
use crate::mcp::{self, Credentials};
use crate::policy::PolicyConfig;

pub const SITE_KEY_HEADER: &str = "x-hostbridge-site-key";

type AppState = Arc<Daemon>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    ok: bool,
    error_code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// A [`BridgeError`] leaving through HTTP
struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let body = Json(ErrorBody {
            ok: false,
            error_code: code,
            message: self.0.to_string(),
            data: self.0.data(),
        });
        (status_for(code), body).into_response()
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    StatusCode::from_u16(code.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/pair", post(pair))
        .route("/v1/command", post(command))
        .route("/v1/mcp", post(mcp_message))
        .route("/v1/confirmations", get(list_confirmations))
        .route("/v1/confirmations/resolve", post(resolve_confirmation))
        .route("/v1/policy", get(get_policy).patch(patch_policy))
        .with_state(daemon)
}

pub async fn serve(daemon: Arc<Daemon>, listener: TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("hostbridge listening on {}", addr);
    axum::serve(listener, router(daemon)).await?;
    Ok(())
}

/// The token from an `Authorization: Bearer …` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

fn site_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(SITE_KEY_HEADER)?.to_str().ok()
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

async fn pair(
    State(daemon): State<AppState>,
    Json(req): Json<PairRequest>,
) -> Result<Json<PairResponse>, ApiError> {
    Ok(Json(daemon.pair(&req).await?))
}

async fn command(
    State(daemon): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CommandRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    let response = daemon
        .handle(req, bearer_token(&headers), site_key(&headers))
        .await;
    let status = response.error_code.map_or(StatusCode::OK, status_for);
    (status, Json(response))
}

async fn mcp_message(
    State(daemon): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let creds = Credentials {
        token: bearer_token(&headers),
        site_key: site_key(&headers),
    };
    match mcp::handle_message(&daemon, creds, &body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn list_confirmations(
    State(daemon): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConfirmationEntry>>, ApiError> {
    daemon.verify_admin(bearer_token(&headers))?;
    Ok(Json(daemon.list_confirmations()))
}

async fn resolve_confirmation(
    State(daemon): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ConfirmationEntry>, ApiError> {
    daemon.verify_admin(bearer_token(&headers))?;
    Ok(Json(daemon.resolve_confirmation(&req).await?))
}

async fn get_policy(
    State(daemon): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PolicyConfig>, ApiError> {
    daemon.verify_admin(bearer_token(&headers))?;
    Ok(Json(daemon.policy().as_ref().clone()))
}

async fn patch_policy(
    State(daemon): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Result<Json<PolicyConfig>, ApiError> {
    daemon.verify_admin(bearer_token(&headers))?;
    let policy = daemon.patch_policy(&patch).await?;
    Ok(Json(policy.as_ref().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert("authorization", HeaderValue::from_static("bearer  abc123 "));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_status_follows_error_code() {
        assert_eq!(status_for(ErrorCode::WriteConfirmationRequired).as_u16(), 428);
        assert_eq!(status_for(ErrorCode::PolicyBlocked), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorCode::LimitExceeded), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_error_body_shape() {
        let response = ApiError(BridgeError::PairingFailed).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Plain HTTP transport
//
// JSON rendition of the gRPC services on the same endpoint identifiers, for
// agents that cannot hold a streaming connection. Events are exchanged with
// `Push` (agent to principal) and long-poll `Poll` (principal to agent).
// `/healthz` sits outside the authentication gate.

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::TransportContext;
use crate::domain::auth::{AuthError, AuthSubject, Credentials};
use crate::domain::events::Event;
use crate::infrastructure::auth::AuthGate;

pub const VERSION_PATH: &str = "/versionapi.Version/Version";
pub const AUTHENTICATE_PATH: &str = "/authapi.Authentication/Authenticate";
pub const REFRESH_PATH: &str = "/authapi.Authentication/Refresh";
pub const PUSH_PATH: &str = "/eventstreamapi.EventStream/Push";
pub const POLL_PATH: &str = "/eventstreamapi.EventStream/Poll";
pub const HEALTH_PATH: &str = "/healthz";

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionBody {
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthRequestBody {
    pub method: String,
    #[serde(default)]
    pub credentials: Credentials,
    pub mode: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponseBody {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequestBody {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollParams {
    pub timeout_ms: Option<u64>,
}

pub fn router(ctx: TransportContext) -> Router {
    let gated = Router::new()
        .route(VERSION_PATH, post(version_handler))
        .route(AUTHENTICATE_PATH, post(authenticate_handler))
        .route(REFRESH_PATH, post(refresh_handler))
        .route(PUSH_PATH, post(push_handler))
        .route(POLL_PATH, post(poll_handler))
        .route_layer(middleware::from_fn_with_state(ctx.auth.clone(), require_auth));

    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .merge(gated)
        .with_state(ctx)
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn auth_error_response(error: &AuthError) -> Response {
    let status = match error {
        AuthError::UnknownMethod(_) | AuthError::InvalidMode(_) | AuthError::MissingCredential(_) => {
            StatusCode::BAD_REQUEST
        }
        AuthError::NamespaceNotAllowed(_) => StatusCode::FORBIDDEN,
        AuthError::DuplicateMethod(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNAUTHORIZED,
    };
    error_response(status, error)
}

async fn require_auth(State(gate): State<Arc<AuthGate>>, mut req: Request, next: Next) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match gate.authorize(req.uri().path(), authorization) {
        Ok(subject) => {
            if let Some(subject) = subject {
                req.extensions_mut().insert(subject);
            }
            next.run(req).await
        }
        Err(e) => {
            debug!(path = %req.uri().path(), "Rejected unauthenticated HTTP call: {}", e);
            auth_error_response(&e)
        }
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn version_handler(State(ctx): State<TransportContext>) -> Json<VersionBody> {
    Json(VersionBody {
        version: ctx.version.clone(),
    })
}

async fn authenticate_handler(
    State(ctx): State<TransportContext>,
    Json(body): Json<AuthRequestBody>,
) -> Response {
    match ctx
        .handshake
        .authenticate(&body.method, &body.credentials, &body.mode)
        .await
    {
        Ok(tokens) => Json(AuthResponseBody {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })
        .into_response(),
        Err(e) => auth_error_response(&e),
    }
}

async fn refresh_handler(
    State(ctx): State<TransportContext>,
    Extension(subject): Extension<AuthSubject>,
    Json(body): Json<RefreshRequestBody>,
) -> Response {
    match ctx.handshake.refresh(&subject, &body.refresh_token) {
        Ok(access_token) => Json(AuthResponseBody {
            access_token,
            refresh_token: body.refresh_token,
        })
        .into_response(),
        Err(e) => auth_error_response(&e),
    }
}

async fn push_handler(
    State(ctx): State<TransportContext>,
    Extension(subject): Extension<AuthSubject>,
    Json(events): Json<Vec<Event>>,
) -> Response {
    let recv = ctx.queues.ensure(&subject.client_id).recv;
    let accepted = events.len();
    for event in events {
        recv.add(event);
    }
    debug!(client = %subject.client_id, accepted, "Accepted pushed events");
    (StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))).into_response()
}

/// Wait for the next queued event. 200 with the event, 204 when the timeout
/// passes, 503 once the server drains.
async fn poll_handler(
    State(ctx): State<TransportContext>,
    Extension(subject): Extension<AuthSubject>,
    Query(params): Query<PollParams>,
) -> Response {
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_POLL_TIMEOUT)
        .min(MAX_POLL_TIMEOUT);
    let lease = ctx.queues.attach(&subject.client_id);

    tokio::select! {
        _ = ctx.drain.cancelled() => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "principal is shutting down")
        }
        event = lease.pair().send.next() => Json(event).into_response(),
        _ = tokio::time::sleep(timeout) => StatusCode::NO_CONTENT.into_response(),
    }
}

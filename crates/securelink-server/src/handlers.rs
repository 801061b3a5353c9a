use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::{
    api::{
        BurnRequest, CheckResponse, CreateRequest, CreateResponse, ErrorBody, StatusResponse,
        ViewRequest, ViewResponse,
    },
    error::LifecycleError,
    lifecycle::{NewSecret, SecretManager},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

pub async fn create_secret(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let new = NewSecret {
        ciphertext: body.content,
        pin: body.password,
        ttl_secs: body.ttl,
    };
    match run_blocking(&state, move |m| m.create(new)).await {
        Ok(created) => Json(CreateResponse {
            id: created.id,
            admin_token: created.admin_token,
        })
        .into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── Check ─────────────────────────────────────────────────────────────────────

pub async fn check_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match run_blocking(&state, move |m| m.check(&id)).await {
        Ok(check) => Json(CheckResponse {
            exists: true,
            requires_password: check.requires_pin,
            remaining_attempts: check.attempts_remaining,
        })
        .into_response(),
        // Pre-flight check: report absence as 404 rather than 410.
        Err(LifecycleError::Gone) => {
            (StatusCode::NOT_FOUND, Json(json!({"exists": false}))).into_response()
        }
        Err(e) => lifecycle_error(e),
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn secret_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match run_blocking(&state, move |m| m.status(&id)).await {
        Ok(summary) => Json(StatusResponse {
            active: summary.active,
            attempts_left: summary.attempts_left,
            created_at: summary.created_at,
            expires_at: summary.expires_at,
        })
        .into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── View ──────────────────────────────────────────────────────────────────────

/// The body is optional: a blank POST is a guess with no PIN.
pub async fn view_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request: ViewRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ViewRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => return bad_request(format!("invalid request body: {e}")),
        }
    };

    match run_blocking(&state, move |m| m.view(&id, request.password.as_deref())).await {
        Ok(content) => Json(ViewResponse { content }).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── Burn ──────────────────────────────────────────────────────────────────────

/// A body that is missing, unreadable, or has no `adminToken` carries no
/// credential and is rejected as unauthorized.
pub async fn burn_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let token = serde_json::from_slice::<BurnRequest>(&body)
        .ok()
        .and_then(|b| b.admin_token)
        .filter(|t| !t.is_empty());
    let Some(token) = token else {
        return lifecycle_error(LifecycleError::Unauthorized);
    };

    match run_blocking(&state, move |m| m.burn(&id, &token)).await {
        Ok(()) => Json(json!({"burned": true})).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Run a lifecycle call on the blocking pool. The spawned task owns the work,
/// so a client hanging up mid-request cannot cut a store update in half.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, LifecycleError>
where
    T: Send + 'static,
    F: FnOnce(&SecretManager) -> Result<T, LifecycleError> + Send + 'static,
{
    let manager = state.manager.clone();
    match tokio::task::spawn_blocking(move || f(&manager)).await {
        Ok(result) => result,
        Err(e) => Err(LifecycleError::Internal(format!("worker task failed: {e}"))),
    }
}

fn error_body(status: StatusCode, message: &str, remaining: Option<u32>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_owned(),
            remaining_attempts: remaining,
        }),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    error_body(StatusCode::BAD_REQUEST, &message, None)
}

fn lifecycle_error(e: LifecycleError) -> Response {
    match e {
        LifecycleError::Gone => {
            error_body(StatusCode::GONE, "secret not found or destroyed", None)
        }
        LifecycleError::WrongPin { attempts_remaining } => error_body(
            StatusCode::UNAUTHORIZED,
            &format!("incorrect password, {attempts_remaining} attempt(s) remaining"),
            Some(attempts_remaining),
        ),
        LifecycleError::Unauthorized => {
            error_body(StatusCode::UNAUTHORIZED, "invalid admin token", None)
        }
        LifecycleError::Invalid(msg) => bad_request(msg),
        LifecycleError::Store(e) => {
            warn!(error = %e, "store failure");
            error_body(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable", None)
        }
        LifecycleError::Pin(msg) | LifecycleError::Internal(msg) => {
            error!(error = %msg, "internal error");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error",
                None,
            )
        }
    }
}

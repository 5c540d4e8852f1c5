pub mod triggers;

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use trigwatch_common::error::ErrorKind;
use trigwatch_storage::OpContext;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::error::AppError;
use crate::logging::TraceId;
use crate::state::AppState;

/// Error envelope, as documented in the OpenAPI schema.
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    /// Custom error code, 0 on success
    pub err_code: i32,
    pub err_msg: String,
    /// Status label of the failure class, e.g. "Remote server unavailable"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub trace_id: String,
}

/// Response envelope shared by every endpoint.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub err_code: i32,
    pub err_msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            status: None,
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn to_custom_error_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidRequest => 1001,
        ErrorKind::NotFound => 1004,
        ErrorKind::Conflict => 1005,
        ErrorKind::InvalidExpression => 1011,
        ErrorKind::ParseError => 1012,
        ErrorKind::EvalError => 1013,
        ErrorKind::UnknownFunctionError => 1014,
        ErrorKind::SourceNotConfigured => 1021,
        ErrorKind::RemoteUnavailable => 1301,
        ErrorKind::RemoteBadResponse => 1302,
        ErrorKind::BackingStoreUnavailable => 1501,
        ErrorKind::InternalError => 1500,
    }
}

/// HTTP status and status label of an error kind. A bad remote response is
/// the caller's fault when the remote answered 4xx.
pub fn status_for(kind: ErrorKind, remote_status: Option<u16>) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::InvalidRequest
        | ErrorKind::InvalidExpression
        | ErrorKind::ParseError
        | ErrorKind::EvalError
        | ErrorKind::UnknownFunctionError => (StatusCode::BAD_REQUEST, "Invalid request"),
        ErrorKind::SourceNotConfigured => (StatusCode::BAD_REQUEST, "Remote source not configured"),
        ErrorKind::RemoteUnavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "Remote server unavailable")
        }
        ErrorKind::RemoteBadResponse => match remote_status {
            Some(s) if (400..500).contains(&s) => {
                (StatusCode::BAD_REQUEST, "Remote server bad response")
            }
            _ => (StatusCode::BAD_GATEWAY, "Remote server bad response"),
        },
        ErrorKind::BackingStoreUnavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "Backing store unavailable")
        }
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Resource not found"),
        ErrorKind::Conflict => (StatusCode::CONFLICT, "Conflict"),
        ErrorKind::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
    }
}

pub fn error_response(
    status: StatusCode,
    trace_id: &str,
    kind: ErrorKind,
    label: &str,
    msg: &str,
    data: Option<Value>,
) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(kind),
            err_msg: msg.to_string(),
            status: Some(label.to_string()),
            trace_id: trace_id.to_string(),
            data,
        }),
    )
        .into_response()
}

/// Envelope for a failed controller call. Remote timeouts and rejected
/// verification trees are carried in `data`.
pub fn app_error_response(trace_id: &str, err: &AppError) -> Response {
    let kind = err.kind();
    let (status, label) = status_for(kind, err.remote_status());
    let data = match err {
        AppError::TargetsInvalid(checks) => Some(json!({ "checks": checks })),
        _ => err
            .remote_timeout()
            .filter(|_| kind == ErrorKind::RemoteUnavailable)
            .map(|t| json!({ "timeout_ms": t.as_millis() as u64 })),
    };
    if status.is_server_error() {
        tracing::error!(trace_id = %trace_id, kind = %kind, error = %err, "Request failed");
    }
    error_response(status, trace_id, kind, label, &err.to_string(), data)
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    /// "ok", or the store error when the backing store cannot be reached
    storage_status: String,
    remote_enabled: bool,
}

/// Service health. Pings the primary backing store.
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let storage_status = match state.db.ping(&ctx).await {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            storage_status,
            remote_enabled: state.sources.has_remote(),
        },
    )
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .merge(triggers::routes())
}

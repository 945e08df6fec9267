use crate::engine::Tracker;
use crate::errors::{AppError, AppResult};
use crate::models::{
    json_object, json_value, scalar_text, AppendRemarkRequest, ErrorResponse, HealthResponse,
    RecordUpdate, RowResponse, SummaryResponse, UpdateRecordRequest,
};
use crate::store::DocumentStore;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_yaml::{Mapping, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) | AppError::Validation(_) | AppError::Consistency(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Io(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if self.is_client_error() {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        } else {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            ok: false,
            code: self.code(),
            error: self.reason().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router<S: DocumentStore + 'static>(tracker: Arc<Tracker<S>>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/data", get(data::<S>))
        .route("/api/update", post(update::<S>))
        .route("/api/append_remark", post(append_remark::<S>))
        .fallback(fallback)
        .with_state(tracker)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %Uuid::new_v4(),
            )
        }))
}

pub async fn serve<S: DocumentStore + 'static>(tracker: Arc<Tracker<S>>, addr: SocketAddr) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tacheles api listening");
    axum::serve(listener, router(tracker))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("tacheles api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for ctrl-c");
    }
}

/// Runs blocking store work off the async executor.
async fn blocking<T, F>(task: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| AppError::Internal(format!("blocking task failed: {}", error)))?
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn fallback() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            ok: false,
            code: "NOT_FOUND",
            error: "not found".to_string(),
        }),
    )
        .into_response()
}

async fn data<S: DocumentStore + 'static>(
    State(tracker): State<Arc<Tracker<S>>>,
) -> Result<Json<SummaryResponse>, AppError> {
    let response = blocking(move || {
        let summary = tracker.summary()?;
        Ok(SummaryResponse {
            ok: true,
            fingerprint: summary.fingerprint,
            count: summary.count,
            rows: summary.rows.iter().map(json_value).collect::<AppResult<_>>()?,
        })
    })
    .await?;
    Ok(Json(response))
}

async fn update<S: DocumentStore + 'static>(
    State(tracker): State<Arc<Tracker<S>>>,
    payload: Result<Json<UpdateRecordRequest>, JsonRejection>,
) -> Result<Json<RowResponse>, AppError> {
    let request = request_body(payload)?;
    let record_id = required_text(&request.id, "id")?;
    let patch = match request.patch {
        Value::Mapping(patch) => patch,
        _ => {
            let field = request
                .field
                .as_deref()
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .ok_or_else(|| AppError::Validation("field missing".to_string()))?;
            let mut patch = Mapping::new();
            patch.insert(Value::from(field), request.value);
            patch
        }
    };

    let response = blocking(move || {
        let update = tracker.update_record(&record_id, &patch)?;
        row_response(update, tracker.fingerprint()?)
    })
    .await?;
    Ok(Json(response))
}

async fn append_remark<S: DocumentStore + 'static>(
    State(tracker): State<Arc<Tracker<S>>>,
    payload: Result<Json<AppendRemarkRequest>, JsonRejection>,
) -> Result<Json<RowResponse>, AppError> {
    let request = request_body(payload)?;
    let record_id = required_text(&request.id, "id")?;
    let field = request
        .field
        .as_deref()
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation("field missing".to_string()))?;
    let timestamp = request.ts.unwrap_or_default();
    let text = request.text.unwrap_or_default();

    let response = blocking(move || {
        let update = tracker.append_remark(&record_id, &field, &timestamp, &text)?;
        row_response(update, tracker.fingerprint()?)
    })
    .await?;
    Ok(Json(response))
}

fn row_response(update: RecordUpdate, fingerprint: String) -> AppResult<RowResponse> {
    Ok(RowResponse {
        ok: true,
        fingerprint,
        row: json_object(&update.record)?,
        changed: update.changed,
    })
}

fn request_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| AppError::Validation(format!("invalid request body: {}", rejection.body_text())))
}

fn required_text(value: &Value, name: &str) -> AppResult<String> {
    scalar_text(value)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{} missing", name)))
}

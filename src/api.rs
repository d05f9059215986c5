//! Local HTTP control API.
//!
//! Lets a helper on the same machine check on the assistant and manage the
//! reminders list. Handlers never touch state directly: each one posts an
//! `AppEvent` and, where it needs an answer, waits on a oneshot reply.
//! Binds to 127.0.0.1 only.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::app::{AppEvent, StatusSnapshot};
use crate::reminders::Reminder;

#[derive(Clone)]
pub struct ApiState {
    events: mpsc::UnboundedSender<AppEvent>,
}

#[derive(Deserialize)]
struct AddReminderRequest {
    text: String,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Json<Self> {
        Json(Self {
            status: status.into(),
            error: None,
        })
    }

    fn err(code: StatusCode, message: impl Into<String>) -> ApiError {
        (
            code,
            Json(Self {
                status: "error".into(),
                error: Some(message.into()),
            }),
        )
    }
}

type ApiError = (StatusCode, Json<SimpleResponse>);

pub fn router(events: mpsc::UnboundedSender<AppEvent>) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/reminders", get(handle_list).post(handle_add))
        .route("/reminders/{id}", delete(handle_delete))
        .route("/cancel", post(handle_cancel))
        .with_state(ApiState { events })
}

/// Bind the API and serve it as a background task.
pub async fn start_api(events: mpsc::UnboundedSender<AppEvent>, port: u16) {
    let addr = format!("127.0.0.1:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    let app = router(events);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
}

/// Post an event carrying a reply channel and wait for the answer.
async fn ask<T>(
    state: &ApiState,
    event: impl FnOnce(oneshot::Sender<T>) -> AppEvent,
) -> Result<T, ApiError> {
    let (tx, rx) = oneshot::channel();
    let unavailable = || SimpleResponse::err(StatusCode::SERVICE_UNAVAILABLE, "assistant is shutting down");
    state.events.send(event(tx)).map_err(|_| unavailable())?;
    rx.await.map_err(|_| unavailable())
}

async fn handle_status(State(state): State<ApiState>) -> Result<Json<StatusSnapshot>, ApiError> {
    ask(&state, AppEvent::Snapshot).await.map(Json)
}

async fn handle_list(State(state): State<ApiState>) -> Result<Json<Vec<Reminder>>, ApiError> {
    let snapshot = ask(&state, AppEvent::Snapshot).await?;
    Ok(Json(snapshot.reminders))
}

async fn handle_add(
    State(state): State<ApiState>,
    Json(req): Json<AddReminderRequest>,
) -> Result<(StatusCode, Json<Reminder>), ApiError> {
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(SimpleResponse::err(StatusCode::BAD_REQUEST, "empty text"));
    }
    info!("HTTP add reminder: \"{text}\"");

    match ask(&state, |tx| AppEvent::AddReminder(text, Some(tx))).await? {
        Ok(reminder) => Ok((StatusCode::CREATED, Json(reminder))),
        Err(e) => Err(SimpleResponse::err(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

async fn handle_delete(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Reminder>, ApiError> {
    ask(&state, |tx| AppEvent::DeleteReminder(id, Some(tx)))
        .await?
        .map(Json)
        .ok_or_else(|| SimpleResponse::err(StatusCode::NOT_FOUND, format!("no reminder {id}")))
}

async fn handle_cancel(State(state): State<ApiState>) -> Json<SimpleResponse> {
    let _ = state.events.send(AppEvent::CancelSpeech);
    SimpleResponse::ok("cancelled")
}

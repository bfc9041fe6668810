//! HTTP surface: `POST /scrape` and `GET /healthz`.
//!
//! The router is usable before the browser is up; until an [`Acquirer`] is installed,
//! scrape requests with a usable url get a 500 and health reports `engine_ready: false`.
//! The url is checked first, so a bad request is a 400 whether or not the engine is ready.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tubescribe_core::{AcquisitionResult, Error, ScrapeRequest};
use tubescribe_local::Acquirer;

/// `{"success": bool, "data"?: ..., "error"?: "..."}`, shared by the HTTP handler and `scrape`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AcquisitionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn ok(data: AcquisitionResult) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Caller-facing message. Input errors carry their text verbatim.
pub fn error_message(e: &Error) -> String {
    match e {
        Error::MissingInput(m) => m.clone(),
        other => other.to_string(),
    }
}

pub fn error_status(e: &Error) -> StatusCode {
    if e.is_input() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[derive(Clone, Default)]
pub struct AppState {
    acquirer: Arc<OnceCell<Acquirer>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the acquirer available to handlers. Returns false if one was already installed.
    pub fn install(&self, acquirer: Acquirer) -> bool {
        self.acquirer.set(acquirer).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.acquirer.initialized()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scrape", post(scrape))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "engine_ready": state.is_ready() }))
}

fn failure(e: &Error) -> Response {
    (error_status(e), Json(Envelope::failure(error_message(e)))).into_response()
}

async fn scrape(State(state): State<AppState>, body: Bytes) -> Response {
    // Lenient body: a missing or malformed body is the same as a missing url.
    let req: ScrapeRequest = serde_json::from_slice(&body).unwrap_or_default();
    let url = req.url.unwrap_or_default();
    if let Err(e) = tubescribe_core::parse_target_url(&url) {
        return failure(&e);
    }
    let Some(acquirer) = state.acquirer.get() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Envelope::failure("Browser not initialized")),
        )
            .into_response();
    };
    tracing::info!(url = %url, "scrape request");

    // Detached from the connection: a client hanging up does not cut the run short,
    // and the session is closed when it ends.
    let acquirer = acquirer.clone();
    let task_url = url.clone();
    let joined = tokio::spawn(async move { acquirer.acquire(&task_url).await }).await;
    match joined {
        Ok(Ok(r)) => (StatusCode::OK, Json(Envelope::ok(r))).into_response(),
        Ok(Err(e)) => {
            tracing::error!(url = %url, error = %e, "scrape failed");
            failure(&e)
        }
        Err(e) => {
            tracing::error!(url = %url, error = %e, "scrape task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Envelope::failure(format!("scrape task failed: {e}"))),
            )
                .into_response()
        }
    }
}

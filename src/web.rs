//! HTTP admission for inbound events.
//!
//! Webhooks are verified against the raw body before anything is parsed. Pull request
//! events are acknowledged right away and reconciled in the background; malformed
//! payloads are acknowledged too, so GitHub does not redeliver them.

use std::any::Any;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

use crate::{
    base::config::Config,
    interaction::{
        event::{EVENT_HEADER, EventKind, PullRequestEvent},
        reconcile::Reconciler,
        verify::{self, SIGNATURE_HEADER, VerifyError},
    },
};

/// Largest webhook payload GitHub delivers.
pub const WEBHOOK_BODY_LIMIT: usize = 25 * 1024 * 1024;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub reconciler: Reconciler,
}

/// Acknowledgement returned to GitHub.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    pub message: &'static str,
}

impl WebhookAck {
    fn new(message: &'static str) -> Json<Self> {
        Json(Self { success: true, message })
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/github/webhook", post(github_webhook).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn hello() -> &'static str {
    "Hello World!"
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[instrument(skip_all)]
async fn github_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<WebhookAck>, VerifyError> {
    if let Err(err) = verify::verify_signature(&state.config.github_webhook_secret, &body, header(&headers, SIGNATURE_HEADER)) {
        warn!("Rejected webhook: {}.", err);
        return Err(err);
    }

    let event = header(&headers, EVENT_HEADER).unwrap_or_default();
    info!("Received GitHub webhook: {}", event);

    let Some(kind) = EventKind::from_header(event) else {
        return Ok(WebhookAck::new("Event ignored"));
    };

    match PullRequestEvent::parse(kind, &body) {
        Ok(event) => {
            state.reconciler.schedule(event.key);
            Ok(WebhookAck::new("Webhook received"))
        }
        Err(err) => {
            warn!("Discarding malformed `{}` event: {}.", event, err);
            Ok(WebhookAck::new("Malformed event ignored"))
        }
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    error!("Request handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "Internal server error".to_string(),
        }),
    )
        .into_response()
}

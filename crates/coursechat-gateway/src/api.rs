use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use coursechat_common::{ChatError, ChatRequest, ErrorKind, classify};
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::state::SharedState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Removes the turn from the registry and cancels it once the response
/// body is dropped, whether it finished or the client went away.
struct TurnGuard {
    state: SharedState,
    request_id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let Some((_, token)) = self.state.turns.remove(&self.request_id) {
            token.cancel();
            debug!(request_id = %self.request_id, "turn released");
        }
    }
}

fn error_response(error: ChatError) -> Response {
    let status = match error.kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(error)).into_response()
}

/// POST /api/chat — run one turn and stream it back as `data:` frames.
pub async fn chat(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!("rejected chat body: {}", rejection.body_text());
            return error_response(ChatError::new(
                ErrorKind::Validation,
                rejection.body_text(),
            ));
        }
    };

    let cancel = state.shutdown.child_token();
    let handle = match state.gateway.start_turn(request, cancel.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("chat request refused: {}", e);
            return error_response(classify(&e));
        }
    };

    let request_id = handle.request_id.clone();
    state.turns.insert(request_id.clone(), cancel);
    info!(request_id = %request_id, in_flight = state.turns.len(), "chat turn accepted");

    let guard = TurnGuard {
        state: state.clone(),
        request_id: request_id.clone(),
    };
    let frames = ReceiverStream::new(handle.events).map(move |event| {
        let _held = &guard;
        Ok::<_, Infallible>(Bytes::from(event.encode()))
    });

    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// POST /api/chat/{request_id}/cancel
pub async fn cancel_turn(
    State(state): State<SharedState>,
    Path(request_id): Path<String>,
) -> StatusCode {
    if state.cancel_turn(&request_id) {
        info!(request_id = %request_id, "turn cancelled by client");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// GET /api/status
pub async fn status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let settings = state.gateway.settings();
    Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.gateway.provider().provider_id(),
        "model": settings.model,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "inFlightTurns": state.turns.len(),
        "availablePermits": state.gateway.available_permits(),
        "cache": state.context.cache_stats(),
    }))
}

pub async fn health() -> &'static str {
    "ok"
}

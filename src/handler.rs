use crate::classifier::{classify, Classification};
use crate::constants::CLIENT_CHANNEL_CAPACITY;
use crate::engine::{RetryEngine, StreamEnd};
use crate::health;
use crate::ingress::InboundCall;
use crate::injector::inject_finish_token;
use crate::logging::request_id_middleware;
use crate::main_helper::AppState;
use crate::types::*;
use crate::upstream;
use crate::writer::HeaderOnceWriter;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::Instrument;

pub fn build_router(state: Arc<AppState>, max_body_size: usize) -> Router {
    Router::new()
        .route(
            "/v1beta/models/:model",
            post(proxy_handler).fallback(method_not_allowed),
        )
        .route("/health", get(health::liveness))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn method_not_allowed() -> Response {
    ProxyError::MethodNotAllowed.into_response()
}

pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    tracing::debug!("Received request for: {}", uri.path());
    match handle(state, model, &uri, &headers, &body).await {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!("Request failed: {}", e);
            } else {
                tracing::warn!("Request rejected: {}", e.inner);
            }
            e.into_response()
        }
    }
}

async fn handle(
    state: Arc<AppState>,
    model: String,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response> {
    let call = InboundCall::parse(model, uri, headers, body)?;

    match classify(&state.config, &call.model, &call.request) {
        Classification::Passthrough => {
            upstream::forward_passthrough(&state, &call.upstream, &call.request).await
        }
        Classification::Managed => {
            let request = inject_finish_token(call.request);
            if call.is_stream {
                Ok(spawn_stream(state, call.upstream, request).await)
            } else {
                RetryEngine::run_buffered(&state, &call.upstream, request).await
            }
        }
    }
}

/// Runs the streaming orchestrator in its own task so the response can
/// start flowing as soon as the first attempt commits a head.
async fn spawn_stream(
    state: Arc<AppState>,
    call: upstream::UpstreamCall,
    request: crate::specs::gemini::GenerateContentRequest,
) -> Response {
    let (mut writer, pending) = HeaderOnceWriter::channel(CLIENT_CHANNEL_CAPACITY);

    let task = async move {
        match RetryEngine::run_streaming(&state, &call, request, &mut writer).await {
            Ok(summary) => match summary.end {
                StreamEnd::Completed | StreamEnd::FunctionCall => tracing::info!(
                    attempts = summary.attempts,
                    forwarded_bytes = writer.bytes_forwarded(),
                    "Stream finished: {:?}",
                    summary.end
                ),
                _ => tracing::warn!(
                    attempts = summary.attempts,
                    forwarded_bytes = writer.bytes_forwarded(),
                    "Stream ended without completion: {:?}",
                    summary.end
                ),
            },
            Err(e) => match e.inner {
                ProxyError::ClientGone => tracing::info!("Client went away, stream abandoned"),
                _ => tracing::error!("Stream failed: {}", e),
            },
        }
    };
    tokio::spawn(task.in_current_span());

    pending.into_response().await
}

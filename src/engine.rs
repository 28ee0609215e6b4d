use crate::constants::{FATAL_STATUS_CODES, RETRYABLE_STATUS_CODES};
use crate::continuation::build_retry_request;
use crate::main_helper::AppState;
use crate::processor::process_buffered;
use crate::specs::gemini::GenerateContentRequest;
use crate::str_utils;
use crate::streaming::rewrite_stream;
use crate::types::*;
use crate::upstream::{self, UpstreamCall};
use crate::writer::HeaderOnceWriter;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Consumes an attempt, produces no output.
    Retryable,
    /// Forwarded to the client and ends the call.
    Fatal,
}

pub fn classify_status(status: u16) -> StatusClass {
    if RETRYABLE_STATUS_CODES.contains(&status) {
        StatusClass::Retryable
    } else if FATAL_STATUS_CODES.contains(&status) || !(200..300).contains(&status) {
        StatusClass::Fatal
    } else {
        StatusClass::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Completed,
    FunctionCall,
    /// A non-retryable upstream status ended the call.
    UpstreamStatus(u16),
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub end: StreamEnd,
    pub attempts: u32,
    /// Every attempt's answer text, in order.
    pub accumulated_text: String,
}

pub struct RetryEngine;

impl RetryEngine {
    /// Drives a managed `generateContent` call to a complete answer.
    pub async fn run_buffered(
        state: &AppState,
        call: &UpstreamCall,
        original: GenerateContentRequest,
    ) -> Result<Response> {
        let max = state.config.max_retries;
        let mut current = original.clone();

        for attempt in 1..=max {
            tracing::debug!(attempt, max, "Non-stream attempt");

            let response = upstream::send(state, call, &current, false).await?;
            let status = response.status();
            let body = response.bytes().await?;

            match classify_status(status.as_u16()) {
                StatusClass::Retryable => {
                    tracing::debug!("Received retryable status {}, retrying...", status);
                    continue;
                }
                StatusClass::Fatal => {
                    tracing::warn!("Forwarding upstream status {}", status);
                    return Ok(json_response(status, body));
                }
                StatusClass::Success => {}
            }

            let outcome = process_buffered(&body)?;
            if outcome.is_complete || outcome.has_function_call {
                tracing::info!(
                    attempt,
                    complete = outcome.is_complete,
                    function_call = outcome.has_function_call,
                    "Non-stream response finished"
                );
                return Ok(json_response(StatusCode::OK, outcome.cleaned_body));
            }

            if state.config.debug_mode {
                tracing::debug!(
                    tail = %str_utils::suffix_chars(&outcome.accumulated_text, 80),
                    "Response incomplete, preparing for retry"
                );
            }
            current = build_retry_request(&original, &outcome.accumulated_text);
        }

        tracing::error!("Non-stream request failed after {} attempts", max);
        Err(ProxyError::RetriesExhausted(max).into())
    }

    /// Drives a managed `streamGenerateContent` call, chaining attempts into
    /// one client stream.
    ///
    /// Errors are only returned after the client has been told what it can
    /// still be told: a JSON error if nothing was committed yet, otherwise
    /// nothing and the stream just ends.
    pub async fn run_streaming(
        state: &AppState,
        call: &UpstreamCall,
        original: GenerateContentRequest,
        writer: &mut HeaderOnceWriter,
    ) -> Result<StreamSummary> {
        let max = state.config.max_retries;
        let mut current = original.clone();
        let mut summary = StreamSummary {
            end: StreamEnd::Exhausted,
            attempts: 0,
            accumulated_text: String::new(),
        };

        for attempt in 1..=max {
            summary.attempts = attempt;
            tracing::debug!(attempt, max, "Stream attempt");
            set_sse_headers(writer);

            let sent = tokio::select! {
                biased;
                _ = writer.closed() => return Err(ProxyError::ClientGone.into()),
                sent = upstream::send(state, call, &current, true) => sent,
            };
            let response = match sent {
                Ok(r) => r,
                Err(e) => return fail(writer, e).await,
            };

            let status = response.status();
            match classify_status(status.as_u16()) {
                StatusClass::Retryable => {
                    tracing::debug!("Received retryable status {}, retrying stream...", status);
                    continue;
                }
                StatusClass::Fatal => {
                    let body = tokio::select! {
                        biased;
                        _ = writer.closed() => return Err(ProxyError::ClientGone.into()),
                        body = response.bytes() => body.unwrap_or_default(),
                    };
                    if !writer.send_upstream_error(status, &body).await? {
                        tracing::error!(
                            "Upstream returned {} after the stream started; closing",
                            status
                        );
                    }
                    summary.end = StreamEnd::UpstreamStatus(status.as_u16());
                    return Ok(summary);
                }
                StatusClass::Success => {}
            }

            let outcome = match rewrite_stream(writer, upstream::body_stream(response)).await {
                Ok(o) => o,
                Err(e) => return fail(writer, e).await,
            };
            summary.accumulated_text.push_str(&outcome.accumulated_text);
            tracing::debug!(
                attempt,
                text_chars = outcome.accumulated_text.len(),
                thought_chars = outcome.thought_text.len(),
                "Stream attempt drained"
            );

            if outcome.is_complete || outcome.has_function_call {
                summary.end = if outcome.is_complete {
                    StreamEnd::Completed
                } else {
                    StreamEnd::FunctionCall
                };
                tracing::debug!("Stream is complete or has function call. Finishing.");
                return Ok(summary);
            }

            if state.config.debug_mode {
                tracing::debug!(
                    tail = %str_utils::suffix_chars(&outcome.accumulated_text, 80),
                    "Stream incomplete, preparing for retry"
                );
            }
            current = build_retry_request(&original, &outcome.accumulated_text);
        }

        let exhausted = ProxyError::RetriesExhausted(max);
        if !writer.send_error(&exhausted).await? {
            tracing::warn!(
                "Stream failed after {} attempts; closing without error frame",
                max
            );
        } else {
            tracing::error!("Stream request failed after {} attempts", max);
        }
        Ok(summary)
    }
}

fn set_sse_headers(writer: &mut HeaderOnceWriter) {
    writer.set_header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    writer.set_header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    writer.set_header(header::CONNECTION, HeaderValue::from_static("keep-alive"));
}

async fn fail(writer: &mut HeaderOnceWriter, error: ObservedError) -> Result<StreamSummary> {
    if matches!(error.inner, ProxyError::ClientGone) {
        return Err(error);
    }
    tracing::error!("Stream attempt failed: {}", error.inner);
    writer.send_error(&error.inner).await?;
    Err(error)
}

fn json_response(status: StatusCode, body: bytes::Bytes) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}

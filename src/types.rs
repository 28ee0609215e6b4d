use crate::specs::gemini::ErrorResponse;
use axum::http::StatusCode;
use thiserror::Error;
use tracing_error::SpanTrace;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Upstream request failed: {0}")]
    UpstreamUnavailable(#[from] reqwest::Error),

    #[error("Failed to parse upstream response: {0}")]
    UpstreamParse(#[source] serde_json::Error),

    #[error("Failed to construct final response: {0}")]
    ResponseRebuild(#[source] serde_json::Error),

    #[error("Request failed after maximum retries ({0} attempts)")]
    RetriesExhausted(u32),

    #[error("Error reading upstream stream: {0}")]
    StreamRead(String),

    #[error("Client disconnected")]
    ClientGone,

    #[error("Invalid JSON in request body: {0}")]
    InvalidRequest(String),

    #[error("API key is missing. Please provide it in 'Authorization: Bearer <key>' or 'X-Goog-Api-Key: <key>' header.")]
    MissingCredential,

    #[error("Method not allowed. Please use POST.")]
    MethodNotAllowed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnavailable(_)
            | ProxyError::UpstreamParse(_)
            | ProxyError::StreamRead(_) => StatusCode::BAD_GATEWAY,
            ProxyError::RetriesExhausted(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::MissingCredential => StatusCode::UNAUTHORIZED,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            // Nobody is listening any more; the code only shows up in logs.
            ProxyError::ClientGone => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ProxyError::ResponseRebuild(_)
            | ProxyError::Serialization(_)
            | ProxyError::Internal(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: ProxyError,
    pub span_trace: SpanTrace,
}

impl ObservedError {
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<ProxyError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;

/// Renders the upstream-compatible error document.
pub fn error_body(status: StatusCode, message: &str) -> ErrorResponse {
    ErrorResponse::new(
        status.as_u16(),
        message,
        status.canonical_reason().unwrap_or("Unknown"),
    )
}

impl axum::response::IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        (status, axum::Json(error_body(status, &self.to_string()))).into_response()
    }
}

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        self.inner.into_response()
    }
}

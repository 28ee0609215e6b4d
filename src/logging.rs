use crate::main_helper::Args;
use crate::redaction_layer::RedactingWriter;
use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::panic;
use tracing::{error, info, Span};
use tracing::{info_span, Instrument};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Installs the global subscriber. The returned guard must outlive the
/// server, otherwise buffered log lines are lost on shutdown.
pub fn init_tracing(args: &Args) -> WorkerGuard {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) if args.debug_mode => "gemini_anti_truncate=debug".into(),
        Err(_) => "gemini_anti_truncate=info".into(),
    };

    let (non_blocking, guard) =
        tracing_appender::non_blocking(RedactingWriter::new(std::io::stdout()));

    let fmt_layer = if args.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .boxed()
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init();
    if let Err(e) = result {
        eprintln!("Tracing already initialised: {}", e);
    }

    guard
}

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Tags every call with a request id, reusing one supplied by the client.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response<Body> {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(val) = header_value.clone() {
        req.headers_mut().insert(REQUEST_ID_HEADER, val);
    }

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut response = next.run(req).instrument(span).await;
    if let Some(val) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    response
}

#[derive(Debug, Default)]
pub struct StreamMetric {
    pub chunks: usize,
    pub malformed: usize,
    pub function_calls: usize,
    pub text_chars: usize,
    pub thought_chars: usize,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_summary(&self, is_complete: bool, has_function_call: bool) {
        let request_id = get_request_id();
        info!(
            target: "flight_recorder",
            "[STREAM END] RequestID: {} | Chunks: {} | Malformed: {} | FunctionCalls: {} | Text: {} chars | Thought: {} chars | Complete: {} | Tool: {}",
            request_id,
            self.chunks,
            self.malformed,
            self.function_calls,
            self.text_chars,
            self.thought_chars,
            is_complete,
            has_function_call
        );
    }
}

pub fn get_request_id() -> String {
    match Span::current().field("request_id").map(|v| v.to_string()) {
        Some(id) => id,
        None => "unknown".to_string(),
    }
}

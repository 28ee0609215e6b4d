use crate::constants::STREAM_OPERATION_MARKER;
use crate::specs::gemini::GenerateContentRequest;
use crate::str_utils;
use crate::types::*;
use crate::upstream::{UpstreamCall, GOOG_API_KEY_HEADER};
use axum::extract::Query;
use axum::http::{header, HeaderMap, Uri};
use std::collections::HashMap;

/// A decoded inbound call, ready for classification.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub model: String,
    pub is_stream: bool,
    pub request: GenerateContentRequest,
    pub upstream: UpstreamCall,
}

impl InboundCall {
    pub fn parse(model: String, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> Result<Self> {
        let credential = extract_credential(headers, uri)?;
        let request = decode_request(body)?;
        let upstream = UpstreamCall::new(
            uri.path(),
            uri.query().map(str::to_string),
            credential,
        )
        .with_authorization(headers.get(header::AUTHORIZATION).cloned());

        Ok(Self {
            is_stream: is_stream_request(uri.path()),
            model,
            request,
            upstream,
        })
    }
}

/// Bearer token first, then `X-Goog-Api-Key`, then the `key` query parameter.
pub fn extract_credential(headers: &HeaderMap, uri: &Uri) -> Result<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(token) = bearer {
        return Ok(token.to_string());
    }

    let api_key = headers
        .get(GOOG_API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if let Some(key) = api_key {
        return Ok(key.to_string());
    }

    let from_query = Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(mut params)| params.remove("key"))
        .filter(|v| !v.is_empty());
    if let Some(key) = from_query {
        return Ok(key);
    }

    Err(ProxyError::MissingCredential.into())
}

pub fn is_stream_request(path: &str) -> bool {
    path.contains(STREAM_OPERATION_MARKER)
}

pub fn decode_request(body: &[u8]) -> Result<GenerateContentRequest> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(
            "Rejecting request body: {} ({})",
            e,
            str_utils::prefix_chars(&String::from_utf8_lossy(body), 120)
        );
        ProxyError::InvalidRequest(e.to_string()).into()
    })
}

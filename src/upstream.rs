use crate::main_helper::AppState;
use crate::specs::gemini::GenerateContentRequest;
use crate::types::*;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use futures_util::{Stream, StreamExt};

pub const GOOG_API_KEY_HEADER: &str = "x-goog-api-key";

/// Hop-by-hop headers plus framing, which the server re-derives for the
/// streamed body.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Everything about the inbound call that each upstream attempt repeats.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub path: String,
    pub query: Option<String>,
    pub credential: String,
    pub authorization: Option<HeaderValue>,
}

impl UpstreamCall {
    pub fn new(path: impl Into<String>, query: Option<String>, credential: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: query.filter(|q| !q.is_empty()),
            credential: credential.into(),
            authorization: None,
        }
    }

    pub fn with_authorization(mut self, authorization: Option<HeaderValue>) -> Self {
        self.authorization = authorization;
        self
    }

    /// Base + inbound path + inbound query. With `force_sse` the query is
    /// guaranteed to carry `alt=sse`.
    pub fn url(&self, base: &str, force_sse: bool) -> String {
        let base = base.trim_end_matches('/');
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        let query = if force_sse {
            Some(ensure_sse(self.query.as_deref()))
        } else {
            self.query.clone()
        };

        match query {
            Some(q) => format!("{}{}?{}", base, path, q),
            None => format!("{}{}", base, path),
        }
    }
}

fn ensure_sse(query: Option<&str>) -> String {
    let mut pairs: Vec<String> = query
        .unwrap_or_default()
        .split('&')
        .filter(|p| !p.is_empty())
        .filter(|p| !(*p == "alt" || p.starts_with("alt=")))
        .map(str::to_string)
        .collect();
    pairs.push("alt=sse".to_string());
    pairs.join("&")
}

/// Issues one POST to the upstream. Only transport failures are errors;
/// any status is returned to the caller for classification.
pub async fn send(
    state: &AppState,
    call: &UpstreamCall,
    request: &GenerateContentRequest,
    force_sse: bool,
) -> Result<reqwest::Response> {
    let url = call.url(&state.config.upstream_url_base, force_sse);
    tracing::debug!("[⚙️  -> ☁️ ] POST {}", url);

    let mut builder = state
        .client
        .post(&url)
        .header(GOOG_API_KEY_HEADER, call.credential.as_str())
        .json(request);
    if let Some(auth) = &call.authorization {
        builder = builder.header(header::AUTHORIZATION, auth.clone());
    }

    let response = builder.send().await?;
    tracing::debug!("[☁️  -> ⚙️ ] Upstream status {}", response.status());
    Ok(response)
}

/// Upstream body as the byte stream the rewriter consumes.
pub fn body_stream(
    response: reqwest::Response,
) -> impl Stream<Item = std::result::Result<bytes::Bytes, std::io::Error>> {
    response.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other))
}

/// Forwards an unmanaged call untouched and streams the answer back.
pub async fn forward_passthrough(
    state: &AppState,
    call: &UpstreamCall,
    request: &GenerateContentRequest,
) -> Result<Response> {
    let upstream = match send(state, call, request, false).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("[☁️  -> ⚙️ ] Passthrough upstream request failed: {}", e.inner);
            return Err(e);
        }
    };

    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers());

    let mut response = Response::new(Body::from_stream(body_stream(upstream)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop_or_framing(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn is_hop_by_hop_or_framing(name: &HeaderName) -> bool {
    STRIPPED_RESPONSE_HEADERS.contains(&name.as_str())
}

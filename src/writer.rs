use crate::types::*;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

pub type BodyChunk = std::result::Result<Bytes, std::io::Error>;

#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Client-facing writer shared by every upstream attempt of one call.
///
/// Status and headers are committed at most once: by the first explicit
/// `write_head` or implicitly by the first `write`. Afterwards header
/// mutations and further `write_head` calls are absorbed.
pub struct HeaderOnceWriter {
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    staged: HeaderMap,
    body_tx: mpsc::Sender<BodyChunk>,
    buffer: BytesMut,
    bytes_forwarded: u64,
}

/// The handler's half: resolves into the response once the head is committed.
pub struct PendingResponse {
    head_rx: oneshot::Receiver<ResponseHead>,
    body_rx: mpsc::Receiver<BodyChunk>,
}

impl HeaderOnceWriter {
    pub fn channel(capacity: usize) -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(capacity);
        let writer = Self {
            head_tx: Some(head_tx),
            staged: HeaderMap::new(),
            body_tx,
            buffer: BytesMut::new(),
            bytes_forwarded: 0,
        };
        (writer, PendingResponse { head_rx, body_rx })
    }

    pub fn is_committed(&self) -> bool {
        self.head_tx.is_none()
    }

    /// Bytes handed to the client so far, across all attempts.
    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes_forwarded
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if self.is_committed() {
            return;
        }
        self.staged.insert(name, value);
    }

    /// Commits the head. Returns false when it was already committed.
    pub fn write_head(&mut self, status: StatusCode) -> bool {
        let Some(head_tx) = self.head_tx.take() else {
            return false;
        };
        let head = ResponseHead {
            status,
            headers: std::mem::take(&mut self.staged),
        };
        if head_tx.send(head).is_err() {
            tracing::debug!("Client went away before response head was sent");
        }
        true
    }

    pub fn write(&mut self, data: &[u8]) {
        if !self.is_committed() {
            self.write_head(StatusCode::OK);
        }
        self.buffer.extend_from_slice(data);
    }

    /// Hands buffered bytes to the client, waiting for channel capacity.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        let len = chunk.len() as u64;
        if self.body_tx.send(Ok(chunk)).await.is_err() {
            return Err(ProxyError::ClientGone.into());
        }
        self.bytes_forwarded += len;
        Ok(())
    }

    /// Sends a complete JSON error response. Only possible before commit.
    pub async fn send_error(&mut self, error: &ProxyError) -> Result<bool> {
        if self.is_committed() {
            return Ok(false);
        }
        let status = error.status();
        let body = serde_json::to_vec(&error_body(status, &error.to_string()))?;
        self.staged.clear();
        self.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.write_head(status);
        self.write(&body);
        self.flush().await?;
        Ok(true)
    }

    /// Forwards an upstream status and body verbatim. Only possible before commit.
    pub async fn send_upstream_error(&mut self, status: StatusCode, body: &[u8]) -> Result<bool> {
        if self.is_committed() {
            return Ok(false);
        }
        self.staged.clear();
        self.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.write_head(status);
        self.write(body);
        self.flush().await?;
        Ok(true)
    }

    pub fn is_closed(&self) -> bool {
        self.body_tx.is_closed()
    }

    /// Resolves once the client side has been dropped.
    pub async fn closed(&self) {
        self.body_tx.closed().await
    }
}

impl PendingResponse {
    pub async fn into_response(self) -> Response {
        let head = match self.head_rx.await {
            Ok(head) => head,
            Err(_) => {
                tracing::error!("Stream task ended without committing a response");
                return ProxyError::StreamRead(
                    "upstream produced no response".to_string(),
                )
                .into_response();
            }
        };

        let mut response = Response::new(Body::from_stream(ReceiverStream::new(self.body_rx)));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(response: Response) -> (StatusCode, HeaderMap, String) {
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_head_is_committed_once() {
        let (mut writer, pending) = HeaderOnceWriter::channel(8);

        writer.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        assert!(writer.write_head(StatusCode::OK));
        assert!(!writer.write_head(StatusCode::BAD_REQUEST));
        writer.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        writer.write(b"test data");
        writer.flush().await.unwrap();
        drop(writer);

        let (status, headers, body) = collect(pending.into_response().await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(body, "test data");
    }

    #[tokio::test]
    async fn test_first_write_commits_ok() {
        let (mut writer, pending) = HeaderOnceWriter::channel(8);
        writer.write(b"a");
        assert!(writer.is_committed());
        writer.write(b"b");
        writer.flush().await.unwrap();
        assert_eq!(writer.bytes_forwarded(), 2);

        let err = ProxyError::RetriesExhausted(3);
        assert!(!writer.send_error(&err).await.unwrap());
        drop(writer);

        let (status, _, body) = collect(pending.into_response().await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ab");
    }

    #[tokio::test]
    async fn test_error_before_commit() {
        let (mut writer, pending) = HeaderOnceWriter::channel(8);
        writer.set_header(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        );
        let err = ProxyError::RetriesExhausted(3);
        assert!(writer.send_error(&err).await.unwrap());
        drop(writer);

        let (status, headers, body) = collect(pending.into_response().await).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert!(headers.get(header::CACHE_CONTROL).is_none());
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"]["code"], 504);
    }

    #[tokio::test]
    async fn test_flush_reports_client_gone() {
        let (mut writer, pending) = HeaderOnceWriter::channel(1);
        drop(pending);
        writer.write(b"data: x\n\n");
        let err = writer.flush().await.unwrap_err();
        assert!(matches!(err.inner, ProxyError::ClientGone));
        assert!(writer.is_closed());
    }
}

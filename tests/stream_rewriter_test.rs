use bytes::Bytes;
use gemini_anti_truncate::constants::{FINISH_TOKEN, TOKEN_LOOKBEHIND_CHARS};
use gemini_anti_truncate::streaming::{rewrite_stream, StreamOutcome};
use gemini_anti_truncate::types::*;
use gemini_anti_truncate::writer::HeaderOnceWriter;
use serde_json::{json, Value};
use std::io;

fn text_event(text: &str) -> String {
    let chunk = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "index": 0
        }]
    });
    format!("data: {}\n\n", chunk)
}

fn parts_event(parts: Value) -> String {
    let chunk = json!({
        "candidates": [{"content": {"role": "model", "parts": parts}}]
    });
    format!("data: {}\n\n", chunk)
}

/// Feeds `body` in chunks of `size` bytes and returns the client output.
async fn rewrite_chunked(body: &str, size: usize) -> (StreamOutcome, String) {
    let chunks: Vec<io::Result<Bytes>> = body
        .as_bytes()
        .chunks(size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    rewrite_chunks(chunks).await.unwrap()
}

async fn rewrite_chunks(chunks: Vec<io::Result<Bytes>>) -> Result<(StreamOutcome, String)> {
    let (outcome, body) = rewrite_raw(chunks).await?;
    Ok((outcome, String::from_utf8(body.to_vec()).unwrap()))
}

async fn rewrite_raw(chunks: Vec<io::Result<Bytes>>) -> Result<(StreamOutcome, Bytes)> {
    let (mut writer, pending) = HeaderOnceWriter::channel(1024);
    let outcome = rewrite_stream(&mut writer, futures_util::stream::iter(chunks)).await?;
    drop(writer);

    let response = pending.into_response().await;
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Ok((outcome, body))
}

/// Concatenated text of every forwarded `data:` event.
fn client_text(output: &str) -> String {
    output
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .filter_map(|payload| serde_json::from_str::<Value>(payload).ok())
        .filter_map(|v| {
            v["candidates"][0]["content"]["parts"][0]["text"]
                .as_str()
                .map(str::to_string)
        })
        .collect()
}

#[tokio::test]
async fn test_token_never_reaches_client_for_any_chunk_size() {
    let body = format!(
        "{}{}",
        text_event("Hello"),
        text_event(" world![RESPONSE_FINISHED]")
    );

    for size in 1..=TOKEN_LOOKBEHIND_CHARS {
        let (outcome, output) = rewrite_chunked(&body, size).await;
        assert!(outcome.is_complete, "chunk size {}", size);
        assert!(!output.contains(FINISH_TOKEN), "chunk size {}", size);
        assert_eq!(client_text(&output), "Hello world!", "chunk size {}", size);
        assert_eq!(outcome.accumulated_text, "Hello world![RESPONSE_FINISHED]");
    }
}

#[tokio::test]
async fn test_hel_lo_scenario() {
    let body = format!("{}{}", text_event("Hel"), text_event("lo![RESPONSE_FINISHED]"));
    let (outcome, output) = rewrite_chunked(&body, body.len()).await;

    assert!(outcome.is_complete);
    assert!(!outcome.has_function_call);
    assert_eq!(client_text(&output), "Hello!");
    assert!(!output.contains("RESPONSE_FINISHED"));
    assert_eq!(output.matches("data: ").count(), 2);
}

#[tokio::test]
async fn test_token_split_across_events_is_detected() {
    for split in 1..FINISH_TOKEN.len() {
        let (head, tail) = FINISH_TOKEN.split_at(split);
        let body = format!(
            "{}{}",
            text_event(&format!("Done.{}", head)),
            text_event(tail)
        );
        let (outcome, output) = rewrite_chunked(&body, 7).await;
        assert!(outcome.is_complete, "split at {}", split);
        assert!(!output.contains(FINISH_TOKEN), "split at {}", split);
    }
}

#[tokio::test]
async fn test_incomplete_stream_keeps_framing() {
    let body = format!("{}{}", text_event("Once upon"), text_event(" a time"));
    let (outcome, output) = rewrite_chunked(&body, 3).await;

    assert!(!outcome.is_complete);
    assert_eq!(outcome.accumulated_text, "Once upon a time");
    assert_eq!(output, body);
}

#[tokio::test]
async fn test_function_call_switches_to_passthrough() {
    let call = parts_event(json!([
        {"functionCall": {"name": "lookup", "args": {"q": "rust"}}}
    ]));
    let later = text_event("raw[RESPONSE_FINISHED]");
    let body = format!("{}{}", call, later);

    let (outcome, output) = rewrite_chunked(&body, 5).await;
    assert!(outcome.has_function_call);
    assert!(!outcome.is_complete);
    assert_eq!(output, body);
}

#[tokio::test]
async fn test_thought_event_is_forwarded_and_not_scanned() {
    let thought = parts_event(json!([
        {"text": "Thinking about [RESPONSE_FINISHED]", "thought": true}
    ]));
    let body = format!("{}{}", thought, text_event("Answer"));

    let (outcome, output) = rewrite_chunked(&body, 11).await;
    assert!(!outcome.is_complete);
    assert_eq!(outcome.thought_text, "Thinking about [RESPONSE_FINISHED]");
    assert_eq!(outcome.accumulated_text, "Answer");
    assert!(!output.contains(FINISH_TOKEN));
    assert!(output.contains("Thinking about "));
}

#[tokio::test]
async fn test_malformed_event_fails_open() {
    let body = format!("data: {{oops\n\n{}", text_event("still here"));
    let (outcome, output) = rewrite_chunked(&body, 4).await;

    assert!(!outcome.is_complete);
    assert_eq!(outcome.accumulated_text, "still here");
    assert_eq!(output, body);
}

#[tokio::test]
async fn test_invalid_utf8_event_fails_open() {
    let mut body = b"data: {\"bad\":\"".to_vec();
    body.extend_from_slice(&[0xff, 0xfe]);
    body.extend_from_slice(b"\"}\n\n");
    let bad_len = body.len();
    body.extend_from_slice(text_event(&format!("ok{}", FINISH_TOKEN)).as_bytes());

    for size in [1, 3, body.len()] {
        let chunks: Vec<io::Result<Bytes>> = body
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let (outcome, output) = rewrite_raw(chunks).await.unwrap();

        assert!(outcome.is_complete, "chunk size {}", size);
        assert_eq!(outcome.accumulated_text, "ok");
        let mut expected = body[..bad_len].to_vec();
        expected.extend_from_slice(text_event("ok").as_bytes());
        assert_eq!(output.as_ref(), expected.as_slice());
    }
}

#[tokio::test]
async fn test_non_data_lines_forwarded_verbatim() {
    let body = format!(": keep-alive\n\nevent: message\n{}", text_event("hi"));
    let (_, output) = rewrite_chunked(&body, 6).await;
    assert_eq!(output, body);
}

#[tokio::test]
async fn test_crlf_framing_normalised() {
    let body = text_event("hi").replace('\n', "\r\n");
    let (outcome, output) = rewrite_chunked(&body, 2).await;
    assert_eq!(outcome.accumulated_text, "hi");
    assert_eq!(output, text_event("hi"));
}

#[tokio::test]
async fn test_read_error_is_stream_read() {
    let chunks = vec![
        Ok(Bytes::from(text_event("partial"))),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
    ];
    let err = rewrite_chunks(chunks).await.unwrap_err();
    assert!(matches!(err.inner, ProxyError::StreamRead(_)));
}

#[tokio::test]
async fn test_client_gone_stops_reading() {
    let (mut writer, pending) = HeaderOnceWriter::channel(4);
    drop(pending);

    let chunks: Vec<io::Result<Bytes>> = vec![Ok(Bytes::from(text_event("hi")))];
    let err = rewrite_stream(&mut writer, futures_util::stream::iter(chunks))
        .await
        .unwrap_err();
    assert!(matches!(err.inner, ProxyError::ClientGone));
}

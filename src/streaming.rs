use crate::constants::{FINISH_TOKEN, MAX_SSE_LINE_BYTES, TOKEN_LOOKBEHIND_CHARS};
use crate::logging::StreamMetric;
use crate::specs::gemini::{GenerateContentResponse, PartKind};
use crate::str_utils;
use crate::types::*;
use crate::writer::HeaderOnceWriter;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::borrow::Cow;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::io::StreamReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Decoding events and watching for the finish token.
    Scanning,
    /// A function call was seen; everything is forwarded untouched.
    Passthrough,
}

/// Trailing answer text of the current attempt, bounded in characters.
#[derive(Debug, Clone)]
pub struct LookbehindWindow {
    buf: String,
    capacity: usize,
}

impl Default for LookbehindWindow {
    fn default() -> Self {
        Self::new(TOKEN_LOOKBEHIND_CHARS)
    }
}

impl LookbehindWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::new(),
            capacity,
        }
    }

    /// Appends `text` and reports whether the token is visible across the
    /// previous tail and the new text. Only the last `capacity` characters
    /// are retained afterwards.
    pub fn push(&mut self, text: &str) -> bool {
        let mut combined = std::mem::take(&mut self.buf);
        combined.push_str(text);
        let found = combined.contains(FINISH_TOKEN);
        self.buf = str_utils::suffix_chars(&combined, self.capacity).to_string();
        found
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn char_len(&self) -> usize {
        self.buf.chars().count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    pub is_complete: bool,
    pub has_function_call: bool,
    /// Answer text of this attempt only.
    pub accumulated_text: String,
    pub thought_text: String,
}

/// Per-attempt scanning state. Output goes to the shared client writer.
pub struct StreamRewriter {
    state: StreamState,
    window: LookbehindWindow,
    text_buffer: String,
    thought_buffer: String,
    is_complete: bool,
    has_function_call: bool,
    event_open: bool,
    metrics: StreamMetric,
}

impl Default for StreamRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRewriter {
    pub fn new() -> Self {
        Self {
            state: StreamState::Scanning,
            window: LookbehindWindow::default(),
            text_buffer: String::new(),
            thought_buffer: String::new(),
            is_complete: false,
            has_function_call: false,
            event_open: false,
            metrics: StreamMetric::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn window(&self) -> &LookbehindWindow {
        &self.window
    }

    /// Decodes one raw upstream line. Lines that are not UTF-8 are counted
    /// as malformed and forwarded byte for byte.
    pub fn process_bytes(&mut self, line: &[u8], writer: &mut HeaderOnceWriter) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        match std::str::from_utf8(line) {
            Ok(text) => self.process_line(text, writer),
            Err(e) => {
                tracing::debug!("Stream line is not valid UTF-8: {}", e);
                self.metrics.malformed += 1;
                if self.state == StreamState::Scanning && line.starts_with(b"data:") {
                    self.emit_event(line, writer);
                } else {
                    self.forward_raw(line, writer);
                }
            }
        }
    }

    /// Forwards one upstream SSE line, rewritten if needed.
    pub fn process_line(&mut self, line: &str, writer: &mut HeaderOnceWriter) {
        if line.is_empty() {
            // Scanned events are already terminated; only close open ones.
            if self.event_open {
                writer.write(b"\n");
                self.event_open = false;
            }
            return;
        }

        let Some(payload) = line.strip_prefix("data:") else {
            self.forward_raw(line.as_bytes(), writer);
            return;
        };

        if self.state == StreamState::Passthrough {
            self.forward_raw(line.as_bytes(), writer);
            return;
        }

        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        let chunk: GenerateContentResponse = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(
                    "Error unmarshalling stream chunk: {}. Data: {}",
                    e,
                    str_utils::prefix_chars(payload, 200)
                );
                self.metrics.malformed += 1;
                self.emit_event(line.as_bytes(), writer);
                return;
            }
        };
        self.metrics.chunks += 1;

        let mut current_text = String::new();
        let mut current_thought = String::new();
        let mut is_thought_chunk = false;
        let mut triggered_passthrough = false;

        for part in chunk.first_candidate_parts() {
            match part.kind() {
                PartKind::FunctionCall => {
                    self.has_function_call = true;
                    triggered_passthrough = true;
                    self.metrics.function_calls += 1;
                    current_text.push_str(part.text_or_empty());
                }
                PartKind::Thought => {
                    is_thought_chunk = true;
                    current_thought.push_str(part.text_or_empty());
                }
                PartKind::Text => current_text.push_str(part.text_or_empty()),
            }
        }

        if triggered_passthrough && self.state == StreamState::Scanning {
            tracing::debug!("[☁️  -> ⚙️ ] Function call seen, switching to passthrough");
            self.state = StreamState::Passthrough;
        }

        if is_thought_chunk {
            self.metrics.thought_chars += current_thought.len();
            self.thought_buffer.push_str(&current_thought);
            let cleaned = strip_token(line);
            self.emit_event(cleaned.as_bytes(), writer);
            return;
        }

        self.metrics.text_chars += current_text.len();
        self.text_buffer.push_str(&current_text);

        if triggered_passthrough {
            let cleaned = strip_token(line);
            self.emit_event(cleaned.as_bytes(), writer);
            return;
        }

        let mut out = Cow::Borrowed(line);
        if self.window.push(&current_text) {
            if !self.is_complete {
                tracing::debug!("[☁️  -> ⚙️ ] Finish token detected");
            }
            self.is_complete = true;
            out = strip_token(line);
        }
        self.emit_event(out.as_bytes(), writer);
    }

    /// Closes a dangling event and reports what this attempt produced.
    pub fn finish(mut self, writer: &mut HeaderOnceWriter) -> StreamOutcome {
        if self.event_open {
            writer.write(b"\n");
            self.event_open = false;
        }
        self.metrics.log_summary(self.is_complete, self.has_function_call);
        StreamOutcome {
            is_complete: self.is_complete,
            has_function_call: self.has_function_call,
            accumulated_text: self.text_buffer,
            thought_text: self.thought_buffer,
        }
    }

    fn forward_raw(&mut self, line: &[u8], writer: &mut HeaderOnceWriter) {
        writer.write(line);
        writer.write(b"\n");
        self.event_open = true;
    }

    fn emit_event(&mut self, line: &[u8], writer: &mut HeaderOnceWriter) {
        writer.write(line);
        writer.write(b"\n");
        if !line.is_empty() {
            writer.write(b"\n");
        }
        self.event_open = false;
    }
}

fn strip_token(line: &str) -> Cow<'_, str> {
    if line.contains(FINISH_TOKEN) {
        Cow::Owned(line.replace(FINISH_TOKEN, ""))
    } else {
        Cow::Borrowed(line)
    }
}

/// Reads one upstream SSE body to the end, forwarding it live.
///
/// Every processed line is flushed before the next read. Reads race the
/// client going away; in that case `ClientGone` is returned and the
/// upstream body is dropped with the stream.
pub async fn rewrite_stream<S>(writer: &mut HeaderOnceWriter, upstream: S) -> Result<StreamOutcome>
where
    S: Stream<Item = std::result::Result<Bytes, std::io::Error>>,
{
    let mut lines = FramedRead::new(
        StreamReader::new(Box::pin(upstream)),
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_SSE_LINE_BYTES),
    );
    let mut rewriter = StreamRewriter::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = writer.closed() => {
                tracing::debug!("[🖱️  <- ⚙️ ] Client disconnected mid-stream");
                return Err(ProxyError::ClientGone.into());
            }
            line = lines.next() => line,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                let message = match e {
                    AnyDelimiterCodecError::MaxChunkLengthExceeded => {
                        "Max line length exceeded".to_string()
                    }
                    AnyDelimiterCodecError::Io(io) => io.to_string(),
                };
                tracing::error!("[☁️  -> ⚙️ ] Error reading stream from upstream: {}", message);
                writer.flush().await?;
                return Err(ProxyError::StreamRead(message).into());
            }
            None => break,
        };

        rewriter.process_bytes(&line, writer);
        writer.flush().await?;
    }

    let outcome = rewriter.finish(writer);
    writer.flush().await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = LookbehindWindow::default();
        for chunk in ["a", "bcdefghijklmnopqrstuvwxyz", "0123456789", "x", ""] {
            window.push(chunk);
            assert!(window.char_len() <= TOKEN_LOOKBEHIND_CHARS);
        }
        assert_eq!(window.char_len(), TOKEN_LOOKBEHIND_CHARS);
        assert!(window.as_str().ends_with("0123456789x"));
    }

    #[test]
    fn test_window_detects_token_split_across_pushes() {
        for split in 1..FINISH_TOKEN.len() {
            let mut window = LookbehindWindow::default();
            let (head, tail) = FINISH_TOKEN.split_at(split);
            assert!(!window.push(&format!("some answer text {}", head)));
            assert!(window.push(tail), "split at {}", split);
        }
    }

    #[test]
    fn test_window_detects_token_inside_long_text() {
        let mut window = LookbehindWindow::default();
        let text = format!("{}{}{}", "x".repeat(100), FINISH_TOKEN, "y".repeat(100));
        assert!(window.push(&text));
        assert!(window.char_len() <= window.capacity());
    }

    #[tokio::test]
    async fn test_rewriter_window_bounded_and_passthrough_is_one_way() {
        let (mut writer, _pending) = HeaderOnceWriter::channel(64);
        let mut rewriter = StreamRewriter::new();

        for word in ["alpha ", "beta gamma delta epsilon ", "zeta"] {
            let line = format!(
                r#"data: {{"candidates":[{{"content":{{"parts":[{{"text":"{}"}}]}}}}]}}"#,
                word
            );
            rewriter.process_line(&line, &mut writer);
            assert!(rewriter.window().char_len() <= TOKEN_LOOKBEHIND_CHARS);
            assert_eq!(rewriter.state(), StreamState::Scanning);
        }

        rewriter.process_line(
            r#"data: {"candidates":[{"content":{"parts":[{"functionCall":{"name":"f"}}]}}]}"#,
            &mut writer,
        );
        assert_eq!(rewriter.state(), StreamState::Passthrough);
        rewriter.process_line(r#"data: {"candidates":[]}"#, &mut writer);
        assert_eq!(rewriter.state(), StreamState::Passthrough);

        let outcome = rewriter.finish(&mut writer);
        assert!(outcome.has_function_call);
        assert_eq!(outcome.accumulated_text, "alpha beta gamma delta epsilon zeta");
    }

    #[test]
    fn test_window_counts_characters_not_bytes() {
        let mut window = LookbehindWindow::new(4);
        window.push("héllo wörld");
        assert_eq!(window.as_str(), "örld");
    }
}

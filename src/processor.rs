use crate::constants::FINISH_TOKEN;
use crate::specs::gemini::GenerateContentResponse;
use crate::types::*;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct BufferedOutcome {
    pub is_complete: bool,
    pub has_function_call: bool,
    /// Answer text as received, token included.
    pub accumulated_text: String,
    /// Response document with the token removed, ready for the client.
    pub cleaned_body: Bytes,
}

/// Inspects one complete upstream `generateContent` body.
///
/// All text of the first candidate is treated as one logical answer. The
/// cleaned text is written back into the first part only; other parts keep
/// their own text minus any finish token. Multi-part answers therefore come
/// back with the full text in part 0, which is what existing clients of this
/// proxy expect.
pub fn process_buffered(body: &[u8]) -> Result<BufferedOutcome> {
    let mut response: GenerateContentResponse = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Error unmarshalling non-stream response: {}", e);
            return Err(ProxyError::UpstreamParse(e).into());
        }
    };

    let mut accumulated_text = String::new();
    let mut has_function_call = false;
    for part in response.first_candidate_parts() {
        if part.function_call.is_some() {
            has_function_call = true;
        }
        accumulated_text.push_str(part.text_or_empty());
    }

    let is_complete = accumulated_text.contains(FINISH_TOKEN);
    let final_text = accumulated_text.replace(FINISH_TOKEN, "");

    if let Some(parts) = response.first_candidate_parts_mut() {
        let mut iter = parts.iter_mut();
        if let Some(first) = iter.next() {
            if first.text.is_some() || !final_text.is_empty() {
                first.text = Some(final_text);
            }
        }
        for part in iter {
            if let Some(text) = part.text.as_mut() {
                if text.contains(FINISH_TOKEN) {
                    *text = text.replace(FINISH_TOKEN, "");
                }
            }
        }
    }

    let cleaned_body = match serde_json::to_vec(&response) {
        Ok(b) => Bytes::from(b),
        Err(e) => {
            tracing::error!("Error re-marshalling cleaned response: {}", e);
            return Err(ProxyError::ResponseRebuild(e).into());
        }
    };

    Ok(BufferedOutcome {
        is_complete,
        has_function_call,
        accumulated_text,
        cleaned_body,
    })
}

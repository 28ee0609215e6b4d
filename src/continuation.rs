use crate::constants::RETRY_PROMPT;
use crate::specs::gemini::{Content, GenerateContentRequest, Part, Role};

/// Builds the next attempt for a truncated generation.
///
/// The completion API is stateless, so the only way to get a continuation is
/// to replay the history with the partial answer as a model turn, followed
/// by a user turn asking to pick up where it stopped. `original` is never
/// modified.
pub fn build_retry_request(
    original: &GenerateContentRequest,
    partial_text: &str,
) -> GenerateContentRequest {
    let mut next = original.clone();
    next.contents.reserve(2);
    next.contents
        .push(Content::new(Role::Model, vec![Part::text(partial_text)]));
    next.contents
        .push(Content::new(Role::User, vec![Part::text(RETRY_PROMPT)]));
    next
}

use crate::constants::{
    DEFAULT_SYSTEM_INSTRUCTION, SYSTEM_INSTRUCTION_APPENDIX, SYSTEM_INSTRUCTION_PART,
    USER_PROMPT_SUFFIX,
};
use crate::specs::gemini::{Content, GenerateContentRequest, Part, Role};

/// Asks the model to close its answer with the finish token.
///
/// Runs once per client call, before the first attempt. Continuation
/// requests carry the modified history forward and must not be re-injected.
/// Calling it twice on the same request leaves the second call a no-op.
pub fn inject_finish_token(mut request: GenerateContentRequest) -> GenerateContentRequest {
    let instruction = match request.take_system_instruction() {
        None => Content::new(Role::System, vec![Part::text(DEFAULT_SYSTEM_INSTRUCTION)]),
        Some(mut existing) => {
            match existing.parts.first_mut() {
                Some(first) => {
                    let current = first.text_or_empty();
                    if current != DEFAULT_SYSTEM_INSTRUCTION
                        && current != SYSTEM_INSTRUCTION_PART
                        && !current.ends_with(SYSTEM_INSTRUCTION_APPENDIX)
                    {
                        first.text = Some(format!("{}{}", current, SYSTEM_INSTRUCTION_APPENDIX));
                    }
                }
                None => existing.parts.push(Part::text(SYSTEM_INSTRUCTION_PART)),
            }
            existing
        }
    };
    request.set_system_instruction(Some(instruction));

    if let Some(last) = request.contents.last_mut() {
        if last.has_role(&Role::User) {
            append_user_suffix(&mut last.parts);
        }
    }

    request
}

fn append_user_suffix(parts: &mut Vec<Part>) {
    let Some(last) = parts.last_mut() else {
        return;
    };

    if last.text_or_empty().ends_with(USER_PROMPT_SUFFIX) {
        return;
    }

    // A text field on a media or function part would make it invalid upstream.
    let carries_payload = last.function_call.is_some() || !last.extra.is_empty();
    if last.text.is_none() && carries_payload {
        parts.push(Part::text(USER_PROMPT_SUFFIX));
        return;
    }

    last.text = Some(format!("{}{}", last.text_or_empty(), USER_PROMPT_SUFFIX));
}

/// Literal the model is asked to emit once its answer is genuinely complete.
pub const FINISH_TOKEN: &str = "[RESPONSE_FINISHED]";

/// Appended to the last user turn of a managed request.
pub const USER_PROMPT_SUFFIX: &str =
    "\n\n(Note: If you are done, please end your response with [RESPONSE_FINISHED])";

/// System instruction text used when the request carries none.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant. Please ensure your response ends with [RESPONSE_FINISHED]";

/// Appended to an existing system instruction.
pub const SYSTEM_INSTRUCTION_APPENDIX: &str =
    "\n\nPlease ensure your response ends with [RESPONSE_FINISHED]";

/// Used when an existing system instruction has no parts to extend.
pub const SYSTEM_INSTRUCTION_PART: &str = "Please ensure your response ends with [RESPONSE_FINISHED]";

/// User turn appended after a partial model turn when asking for a continuation.
pub const RETRY_PROMPT: &str = "Please continue generating the response from where you left off. Do not repeat the previous content.";

pub const DEFAULT_UPSTREAM_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MAX_RETRIES: u32 = 20;
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Models that exhibit the truncation failure mode and get managed.
pub const DEFAULT_MANAGED_MODELS: &[&str] = &[
    "gemini-1.5-pro-latest",
    "gemini-1.5-flash-latest",
    "gemini-pro",
];

/// Upstream statuses that consume an attempt and loop.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[503, 403, 429];

/// Upstream statuses that are always forwarded to the client as-is.
pub const FATAL_STATUS_CODES: &[u16] = &[500];

/// Trailing characters kept to catch a finish token split across events.
pub const TOKEN_LOOKBEHIND_CHARS: usize = FINISH_TOKEN.len() + 5;

/// Path marker for the upstream streaming operation.
pub const STREAM_OPERATION_MARKER: &str = ":streamGenerateContent";

/// Upper bound for a single upstream SSE line.
pub const MAX_SSE_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Capacity of the channel backing a streaming client body.
pub const CLIENT_CHANNEL_CAPACITY: usize = 16;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// --- GENERATIVE LANGUAGE API (generateContent) SCHEMA ---
///
/// Only the fields the proxy reads or rewrites are typed. Everything else is
/// carried through `extra` so a decode/encode cycle never loses data.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Model,
    Tool,
    System,
    Other(String),
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user" => Role::User,
            "model" => Role::Model,
            "tool" => Role::Tool,
            "system" => Role::System,
            _ => Role::Other(s),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::User => "user".to_string(),
            Role::Model => "model".to_string(),
            Role::Tool => "tool".to_string(),
            Role::System => "system".to_string(),
            Role::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<serde_json::Value>,

    /// Marks model-internal reasoning text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// How a part must be treated. The schema lets fields co-exist, so the
/// precedence is fixed: function call, then thought, then plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    FunctionCall,
    Thought,
    Text,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> PartKind {
        if self.function_call.is_some() {
            PartKind::FunctionCall
        } else if self.thought.unwrap_or(false) {
            PartKind::Thought
        } else {
            PartKind::Text
        }
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role),
            parts,
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.role.as_ref() == Some(role)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_json_schema: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl GenerationConfig {
    /// Structured output already has a machine-checked end condition.
    pub fn has_response_schema(&self) -> bool {
        self.response_schema.is_some() || self.response_json_schema.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(default)]
    pub contents: Vec<Content>,

    /// Canonical system instruction field. Use the accessors below.
    #[serde(
        rename = "system_instruction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    system_instruction: Option<Content>,

    /// Legacy spelling still sent by some clients.
    #[serde(
        rename = "systemInstruction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    legacy_system_instruction: Option<Content>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_settings: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl GenerateContentRequest {
    pub fn new(contents: Vec<Content>) -> Self {
        Self {
            contents,
            ..Default::default()
        }
    }

    /// Canonical field first, legacy field as fallback.
    pub fn system_instruction(&self) -> Option<&Content> {
        self.system_instruction
            .as_ref()
            .or(self.legacy_system_instruction.as_ref())
    }

    /// Removes and returns the effective system instruction, clearing both fields.
    pub fn take_system_instruction(&mut self) -> Option<Content> {
        let canonical = self.system_instruction.take();
        let legacy = self.legacy_system_instruction.take();
        canonical.or(legacy)
    }

    /// Writes the canonical field and clears the legacy one.
    pub fn set_system_instruction(&mut self, instruction: Option<Content>) {
        self.system_instruction = instruction;
        self.legacy_system_instruction = None;
    }

    /// Sets the legacy field only. Kept for clients and tests that still speak it.
    pub fn set_legacy_system_instruction(&mut self, instruction: Option<Content>) {
        self.legacy_system_instruction = instruction;
    }

    pub fn has_response_schema(&self) -> bool {
        self.generation_config
            .as_ref()
            .is_some_and(GenerationConfig::has_response_schema)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A full buffered response, or one chunk of a streamed one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl GenerateContentResponse {
    /// Parts of the first candidate, empty when there is none.
    pub fn first_candidate_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }

    pub fn first_candidate_parts_mut(&mut self) -> Option<&mut Vec<Part>> {
        self.candidates
            .first_mut()
            .and_then(|c| c.content.as_mut())
            .map(|c| &mut c.parts)
    }
}

/// Error document shared with the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(code: u16, message: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code,
                message: message.into(),
                status: status.into(),
            },
        }
    }
}

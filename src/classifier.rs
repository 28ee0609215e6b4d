use crate::main_helper::ProxyConfig;
use crate::specs::gemini::GenerateContentRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Forward untouched.
    Passthrough,
    /// Inject the finish token and drive the retry loop.
    Managed,
}

/// Strips an operation suffix such as `:streamGenerateContent`.
pub fn base_model_name(model: &str) -> &str {
    match model.split_once(':') {
        Some((base, _)) => base,
        None => model,
    }
}

pub fn classify(
    config: &ProxyConfig,
    model: &str,
    request: &GenerateContentRequest,
) -> Classification {
    let base = base_model_name(model);
    let is_target_model = config.is_managed_model(base);
    let has_schema = request.has_response_schema();

    if !is_target_model || has_schema {
        tracing::debug!(
            model = %base,
            is_target_model,
            has_schema,
            "Passthrough request"
        );
        return Classification::Passthrough;
    }

    Classification::Managed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::gemini::{Content, Part, Role};
    use serde_json::json;

    fn hello() -> GenerateContentRequest {
        GenerateContentRequest::new(vec![Content::new(Role::User, vec![Part::text("Hi")])])
    }

    #[test]
    fn test_base_model_name() {
        assert_eq!(base_model_name("gemini-pro:streamGenerateContent"), "gemini-pro");
        assert_eq!(base_model_name("gemini-pro"), "gemini-pro");
        assert_eq!(base_model_name(""), "");
    }

    #[test]
    fn test_allowlisted_model_is_managed() {
        let config = ProxyConfig::default();
        assert_eq!(
            classify(&config, "gemini-pro:generateContent", &hello()),
            Classification::Managed
        );
        assert_eq!(
            classify(&config, "gemini-1.5-flash-latest:streamGenerateContent", &hello()),
            Classification::Managed
        );
    }

    #[test]
    fn test_unknown_model_passes_through() {
        let config = ProxyConfig::default();
        assert_eq!(
            classify(&config, "gemini-2.0-flash:generateContent", &hello()),
            Classification::Passthrough
        );
    }

    #[test]
    fn test_response_schema_passes_through() {
        let config = ProxyConfig::default();
        let mut req = hello();
        req.generation_config = serde_json::from_value(json!({
            "responseMimeType": "application/json",
            "responseSchema": {"type": "OBJECT"}
        }))
        .ok();
        assert_eq!(
            classify(&config, "gemini-pro:generateContent", &req),
            Classification::Passthrough
        );
    }
}

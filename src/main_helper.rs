use crate::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_MANAGED_MODELS, DEFAULT_MAX_RETRIES, DEFAULT_UPSTREAM_URL,
};
use crate::types::*;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, env = "HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub port: u16,
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,
    #[arg(long, env = "UPSTREAM_URL_BASE", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url_base: String,
    /// Total upstream attempts per client call.
    #[arg(
        long,
        env = "MAX_RETRIES",
        default_value_t = DEFAULT_MAX_RETRIES,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_retries: u32,
    #[arg(long = "debug", env = "DEBUG_MODE", default_value_t = false)]
    pub debug_mode: bool,
    /// Comma separated allowlist of models that get anti-truncation handling.
    #[arg(long, env = "MANAGED_MODELS", value_delimiter = ',')]
    pub managed_models: Option<Vec<String>>,
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, env = "MAX_BODY_SIZE", default_value_t = 50 * 1024 * 1024)]
    pub max_body_size: usize,
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

/// Startup configuration. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub upstream_url_base: String,
    pub max_retries: u32,
    pub debug_mode: bool,
    pub managed_models: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_url_base: DEFAULT_UPSTREAM_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            debug_mode: false,
            managed_models: DEFAULT_MANAGED_MODELS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl ProxyConfig {
    pub fn from_args(args: &Args) -> Self {
        let managed_models = match &args.managed_models {
            Some(models) => models
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            None => Self::default().managed_models,
        };

        Self {
            upstream_url_base: args.upstream_url_base.trim_end_matches('/').to_string(),
            max_retries: args.max_retries.max(1),
            debug_mode: args.debug_mode,
            managed_models,
        }
    }

    pub fn is_managed_model(&self, base_model: &str) -> bool {
        self.managed_models.iter().any(|m| m == base_model)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub config: Arc<ProxyConfig>,
}

impl AppState {
    pub fn new(client: reqwest::Client, config: ProxyConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }
}

/// Connection pool shared by every request. Only the connect phase is
/// bounded; attempt length is governed by the retry ceiling and the caller.
pub fn build_http_client(args: &Args) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(args.connect_timeout_secs))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(std::time::Duration::from_secs(60)))
        .build()
        .map_err(|e| {
            ProxyError::Internal(
                format!("Failed to build HTTP client: {}", e),
                tracing_error::SpanTrace::capture(),
            )
        })?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_historical_values() {
        let args = Args::parse_from(["gemini-anti-truncate"]);
        let config = ProxyConfig::from_args(&args);
        assert_eq!(args.port, 8080);
        assert_eq!(config.max_retries, 20);
        assert_eq!(config.upstream_url_base, DEFAULT_UPSTREAM_URL);
        assert!(!config.debug_mode);
        assert!(config.is_managed_model("gemini-pro"));
        assert!(!config.is_managed_model("gemini-2.0-flash"));
    }

    #[test]
    fn test_managed_models_override() {
        let args = Args::parse_from([
            "gemini-anti-truncate",
            "--managed-models",
            "gemini-2.5-pro, gemini-2.5-flash",
            "--upstream-url-base",
            "http://localhost:9000/",
        ]);
        let config = ProxyConfig::from_args(&args);
        assert_eq!(config.managed_models, vec!["gemini-2.5-pro", "gemini-2.5-flash"]);
        assert_eq!(config.upstream_url_base, "http://localhost:9000");
        assert!(!config.is_managed_model("gemini-pro"));
    }

    #[test]
    fn test_zero_retries_rejected() {
        assert!(Args::try_parse_from(["gemini-anti-truncate", "--max-retries", "0"]).is_err());
    }
}

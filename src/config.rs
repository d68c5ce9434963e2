//! Environment-driven configuration

use crate::error::{PipelineError, Result};
use crate::llm::{LlmConfig, DEFAULT_APP_NAME, DEFAULT_LLM_API_URL, DEFAULT_LLM_MODEL};
use crate::worker::WorkerConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "veritas/0.1 (content monitor)";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    /// `None` when no key is configured; LLM-backed workers refuse to start
    pub llm_api_key: Option<String>,
    pub llm_api_url: String,
    pub llm_model: String,
    pub app_name: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_retry_interval: Duration,
    pub user_agent: String,
}

impl PipelineConfig {
    /// Read configuration from the environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| PipelineError::ConfigError("DATABASE_URL not set".to_string()))?;

        let llm_api_key = env::var("LLM_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        Ok(Self {
            database_url,
            llm_api_key,
            llm_api_url: var_or("LLM_API_URL", DEFAULT_LLM_API_URL),
            llm_model: var_or("LLM_MODEL", DEFAULT_LLM_MODEL),
            app_name: var_or("APP_NAME", DEFAULT_APP_NAME),
            poll_interval: Duration::from_secs(parse_var("POLL_INTERVAL_SECS", 300)?),
            batch_size: parse_var("POLL_BATCH_SIZE", 25)?,
            visibility_timeout: Duration::from_secs(parse_var(
                "BROKER_VISIBILITY_TIMEOUT_SECS",
                300,
            )?),
            connect_attempts: parse_var("BROKER_CONNECT_ATTEMPTS", 5)?,
            connect_retry_interval: Duration::from_secs(parse_var(
                "BROKER_RETRY_INTERVAL_SECS",
                5,
            )?),
            user_agent: var_or("REDDIT_USER_AGENT", DEFAULT_USER_AGENT),
        })
    }

    /// LLM settings; errors when no API key is configured
    pub fn llm(&self) -> Result<LlmConfig> {
        let key = self.llm_api_key.as_deref().ok_or_else(|| {
            PipelineError::ConfigError("LLM_API_KEY (or OPENROUTER_API_KEY) not set".to_string())
        })?;

        Ok(LlmConfig::new(key)
            .with_api_url(&self.llm_api_url)
            .with_model(&self.llm_model)
            .with_app_name(&self.app_name))
    }

    /// Worker defaults with the configured poll settings applied
    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig::builder()
            .poll_interval(self.poll_interval)
            .batch_size(self.batch_size)
            .reconnect_interval(self.connect_retry_interval)
            .build()
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::ConfigError(format!("{} is not valid: {:?}", name, raw))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses variable names no other test touches; the process
    // environment is shared between test threads.

    #[test]
    fn parse_var_falls_back_to_default() {
        assert_eq!(parse_var("VERITAS_TEST_UNSET_NUMBER", 42u64).unwrap(), 42);
    }

    #[test]
    fn parse_var_rejects_garbage() {
        env::set_var("VERITAS_TEST_BAD_NUMBER", "soon");
        let err = parse_var::<u64>("VERITAS_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }

    #[test]
    fn var_or_ignores_blank_values() {
        env::set_var("VERITAS_TEST_BLANK", "  ");
        assert_eq!(var_or("VERITAS_TEST_BLANK", "fallback"), "fallback");
    }
}

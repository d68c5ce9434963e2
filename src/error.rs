//! Error types for the pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upstream returned HTTP {status} for {url}")]
    Upstream { url: String, status: u16 },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed message on queue {queue}: {reason}")]
    MalformedMessage { queue: String, reason: String },

    #[error("Unparsable classifier output: {0}")]
    ClassifierParse(String),

    #[error("Unknown source kind: {0}")]
    UnknownSource(String),

    #[error("Invalid source parameters: {0}")]
    InvalidSourceParams(String),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] quick_xml::Error),

    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Broker unavailable after {attempts} attempts (last error: {last_error})")]
    BrokerUnavailable { attempts: u32, last_error: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Delivery failed: {0}")]
    DeliveryError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    /// Whether retrying the same call may succeed.
    ///
    /// Timeouts, connection failures, 5xx and 429 responses and lost
    /// database connections are transient; everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Http { source, .. } => {
                source.is_timeout()
                    || source.is_connect()
                    || source.is_request()
                    || source
                        .status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(true)
            }
            PipelineError::Upstream { status, .. } => *status >= 500 || *status == 429,
            PipelineError::Timeout(_) => true,
            PipelineError::DatabaseError(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            PipelineError::BrokerUnavailable { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn upstream_status_classification() {
        let server_error = PipelineError::Upstream {
            url: "http://llm".to_string(),
            status: 503,
        };
        let rate_limited = PipelineError::Upstream {
            url: "http://llm".to_string(),
            status: 429,
        };
        let bad_request = PipelineError::Upstream {
            url: "http://llm".to_string(),
            status: 400,
        };
        assert!(server_error.is_transient());
        assert!(rate_limited.is_transient());
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn parse_failures_are_not_retried() {
        assert!(PipelineError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!PipelineError::ClassifierParse("maybe".into()).is_transient());
        assert!(!PipelineError::MalformedMessage {
            queue: "raw-content".into(),
            reason: "eof".into()
        }
        .is_transient());
    }
}

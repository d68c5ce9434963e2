//! Source fetchers
//!
//! Each source kind implements `SourceFetcher`; the poller picks the
//! implementation by the kind tag stored on the task.

pub mod reddit;
pub mod rss;

pub use reddit::RedditFetcher;
pub use rss::RssFetcher;

use crate::db::models::SourceDescriptor;
use crate::error::{PipelineError, Result};
use crate::messages::ContentItem;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Tag stored in `SourceDescriptor::kind`
    fn kind(&self) -> &'static str;

    /// Fetch at most `limit` items for the given parameters
    async fn fetch(&self, params: &serde_json::Value, limit: usize) -> Result<Vec<ContentItem>>;
}

/// Fetchers keyed by source kind
#[derive(Default, Clone)]
pub struct SourceRegistry {
    fetchers: HashMap<String, Arc<dyn SourceFetcher>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in reddit and rss fetchers
    pub fn with_defaults(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = http_client(user_agent, timeout)?;
        let mut registry = Self::new();
        registry.register(Arc::new(RedditFetcher::new(client.clone())));
        registry.register(Arc::new(RssFetcher::new(client)));
        Ok(registry)
    }

    pub fn register(&mut self, fetcher: Arc<dyn SourceFetcher>) {
        self.fetchers.insert(fetcher.kind().to_string(), fetcher);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn SourceFetcher>> {
        self.fetchers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.fetchers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Fetch through the fetcher registered for the descriptor's kind
    pub async fn fetch(
        &self,
        source: &SourceDescriptor,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let fetcher = self
            .get(&source.kind)
            .ok_or_else(|| PipelineError::UnknownSource(source.kind.clone()))?;
        let mut items = fetcher.fetch(&source.params, limit).await?;
        items.truncate(limit);
        Ok(items)
    }
}

/// Shared HTTP client for fetchers
pub fn http_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Http {
            url: "client_init".to_string(),
            source: e,
        })
}

/// GET a URL and return the body, mapping non-2xx to `Upstream`
pub(crate) async fn get_text(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PipelineError::Http {
            url: url.to_string(),
            source: e,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::Upstream {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| PipelineError::Http {
        url: url.to_string(),
        source: e,
    })
}

//! Reddit fetcher using the public JSON listing endpoint

use super::{get_text, SourceFetcher};
use crate::error::{PipelineError, Result};
use crate::messages::ContentItem;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_REDDIT_BASE_URL: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    created_utc: f64,
}

pub struct RedditFetcher {
    client: Client,
    base_url: String,
}

impl RedditFetcher {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DEFAULT_REDDIT_BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn listing_url(&self, subreddit: &str, limit: usize) -> String {
        format!("{}/r/{}/new.json?limit={}", self.base_url, subreddit, limit)
    }
}

#[async_trait]
impl SourceFetcher for RedditFetcher {
    fn kind(&self) -> &'static str {
        "reddit"
    }

    async fn fetch(&self, params: &serde_json::Value, limit: usize) -> Result<Vec<ContentItem>> {
        let subreddit = params
            .get("subreddit")
            .and_then(|v| v.as_str())
            .unwrap_or("all")
            .trim_start_matches("r/");
        if subreddit.is_empty() || !subreddit.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PipelineError::InvalidSourceParams(format!(
                "invalid subreddit: {:?}",
                subreddit
            )));
        }
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| (l as usize).min(limit))
            .unwrap_or(limit);

        let url = self.listing_url(subreddit, limit);
        let body = get_text(&self.client, &url).await?;
        let listing: Listing = serde_json::from_str(&body)?;

        let items: Vec<ContentItem> = listing
            .data
            .children
            .into_iter()
            .map(|child| {
                let post = child.data;
                let permalink = if post.permalink.is_empty() {
                    String::new()
                } else {
                    format!("https://reddit.com{}", post.permalink)
                };
                ContentItem::new(post.id, post.title, post.selftext, post.url)
                    .with_extra("author", post.author.unwrap_or_else(|| "[deleted]".to_string()))
                    .with_extra("score", post.score)
                    .with_extra("permalink", permalink)
                    .with_extra("created_utc", post.created_utc)
            })
            .collect();

        debug!("Fetched {} posts from r/{}", items.len(), subreddit);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(base: &str) -> RedditFetcher {
        let client = super::super::http_client("test-agent", Duration::from_secs(5)).unwrap();
        RedditFetcher::with_base_url(client, base)
    }

    #[tokio::test]
    async fn parses_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/rust/new.json"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"children": [
                    {"data": {"id": "abc", "title": "Rust 1.80", "selftext": "notes",
                              "url": "https://blog.rust-lang.org", "author": "ferris",
                              "permalink": "/r/rust/comments/abc", "score": 12,
                              "created_utc": 1700000000.0}}
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = fetcher(&server.uri())
            .fetch(&json!({"subreddit": "rust", "limit": 5}), 25)
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "abc");
        assert_eq!(items[0].extra["author"], json!("ferris"));
        assert_eq!(
            items[0].extra["permalink"],
            json!("https://reddit.com/r/rust/comments/abc")
        );
    }

    #[tokio::test]
    async fn rejects_path_like_subreddit() {
        let err = fetcher("http://127.0.0.1:1")
            .fetch(&json!({"subreddit": "../admin"}), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSourceParams(_)));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher(&server.uri())
            .fetch(&json!({"subreddit": "rust"}), 5)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}

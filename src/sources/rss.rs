//! RSS / Atom feed fetcher

use super::{get_text, SourceFetcher};
use crate::error::{PipelineError, Result};
use crate::messages::ContentItem;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

pub struct RssFetcher {
    client: Client,
}

impl RssFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for RssFetcher {
    fn kind(&self) -> &'static str {
        "rss"
    }

    async fn fetch(&self, params: &serde_json::Value, limit: usize) -> Result<Vec<ContentItem>> {
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PipelineError::InvalidSourceParams("rss source needs a url".to_string()))?;
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::InvalidSourceParams(format!(
                "unsupported feed scheme: {}",
                url.scheme()
            )));
        }

        let body = get_text(&self.client, url.as_str()).await?;
        let mut items = parse_feed(&body)?;
        items.truncate(limit);

        debug!("Fetched {} entries from {}", items.len(), url);
        Ok(items)
    }
}

/// Generate a stable id from an entry link (SHA256, full 64 chars)
pub fn hash_link(link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    body: String,
    link: String,
    published: String,
    author: String,
}

impl EntryBuilder {
    fn set(&mut self, field: &[u8], value: String) {
        let slot = match field {
            b"guid" | b"id" => &mut self.id,
            b"title" => &mut self.title,
            b"description" | b"summary" | b"encoded" | b"content" => &mut self.body,
            b"link" => &mut self.link,
            b"pubDate" | b"published" | b"updated" | b"date" => &mut self.published,
            b"author" | b"creator" | b"name" => &mut self.author,
            _ => return,
        };
        // First value wins: summary before content, published before updated
        if slot.is_empty() {
            *slot = value;
        }
    }

    fn build(self) -> Option<ContentItem> {
        let id = if !self.id.is_empty() {
            self.id
        } else if !self.link.is_empty() {
            hash_link(&self.link)
        } else if !self.title.is_empty() {
            hash_link(&self.title)
        } else {
            return None;
        };

        Some(
            ContentItem::new(id, self.title, self.body, self.link)
                .with_extra("published", self.published)
                .with_extra("author", self.author),
        )
    }
}

/// Parse RSS 2.0 `<item>` and Atom `<entry>` elements
pub fn parse_feed(xml: &str) -> Result<Vec<ContentItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut field: Vec<u8> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"item" | b"entry") {
                    entry = Some(EntryBuilder::default());
                } else if entry.is_some() {
                    field = name.as_ref().to_vec();
                    text.clear();
                }
            }
            Event::Empty(e) => {
                if let Some(builder) = entry.as_mut() {
                    if e.local_name().as_ref() == b"link" {
                        let rel = e
                            .try_get_attribute("rel")
                            .map_err(quick_xml::Error::from)?
                            .map(|a| a.unescape_value().map(|v| v.into_owned()))
                            .transpose()
                            .map_err(quick_xml::Error::from)?;
                        if matches!(rel.as_deref(), None | Some("alternate")) {
                            if let Some(href) = e
                                .try_get_attribute("href")
                                .map_err(quick_xml::Error::from)?
                            {
                                let href = href.unescape_value().map_err(quick_xml::Error::from)?;
                                builder.set(b"link", href.into_owned());
                            }
                        }
                    }
                }
            }
            Event::Text(t) => {
                if entry.is_some() && !field.is_empty() {
                    text.push_str(&t.unescape().map_err(quick_xml::Error::from)?);
                }
            }
            Event::CData(c) => {
                if entry.is_some() && !field.is_empty() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"item" | b"entry") {
                    if let Some(item) = entry.take().and_then(EntryBuilder::build) {
                        items.push(item);
                    }
                    field.clear();
                } else if let Some(builder) = entry.as_mut() {
                    if !text.is_empty() {
                        builder.set(name.as_ref(), std::mem::take(&mut text));
                    }
                    field.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(items)
}

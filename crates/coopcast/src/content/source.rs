//! Content collection sources: HTTP and local file, both YAML.
//!
//! Expected document shape:
//!
//! ```yaml
//! - type: fact
//!   content: Chickens can remember over 100 faces.
//!   source: Wikipedia
//! - type: quote
//!   content: The key to everything is patience.
//!   source: Arnold H. Glasow
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ContentItem, ContentKind, ContentSource};
use crate::error::ContentError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(rename = "type")]
    kind: ContentKind,
    content: String,
    #[serde(default)]
    source: String,
}

/// Parse a YAML collection. An empty collection is a parse error so that a
/// truncated upstream file cannot blank out the cache.
pub fn parse_collection(yaml: &str) -> Result<Vec<ContentItem>, ContentError> {
    let raw: Vec<RawItem> =
        serde_yaml::from_str(yaml).map_err(|e| ContentError::Parse(e.to_string()))?;

    if raw.is_empty() {
        return Err(ContentError::Parse("collection has no items".to_string()));
    }

    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(sequence_number, item)| ContentItem {
            kind: item.kind,
            text: item.content.trim().to_string(),
            source: item.source.trim().to_string(),
            sequence_number,
        })
        .collect())
}

/// Fetches the collection over HTTP(S).
pub struct HttpContentSource {
    client: Client,
    url: String,
}

impl HttpContentSource {
    pub fn new(url: &str) -> Result<Self, ContentError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ContentError::Fetch(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(&self) -> Result<Vec<ContentItem>, ContentError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ContentError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ContentError::Fetch(format!(
                "{} returned status {}",
                self.url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ContentError::Fetch(e.to_string()))?;

        parse_collection(&body)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Reads the collection from a local file.
pub struct FileContentSource {
    path: PathBuf,
}

impl FileContentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ContentSource for FileContentSource {
    async fn fetch(&self) -> Result<Vec<ContentItem>, ContentError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ContentError::Fetch(format!("{}: {}", self.path.display(), e)))?;
        parse_collection(&body)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Pick a source implementation from a configured location.
pub fn content_source_for(location: &str) -> Result<Arc<dyn ContentSource>, ContentError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(HttpContentSource::new(location)?))
    } else {
        let path = location.strip_prefix("file://").unwrap_or(location);
        Ok(Arc::new(FileContentSource::new(path)))
    }
}

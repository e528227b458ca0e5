//! Publish sinks: where posts go.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::PublishError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Identifier the sink assigned to a post.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostId(pub String);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn publish_text(&self, message: &str) -> Result<PostId, PublishError>;

    async fn publish_text_with_media(
        &self,
        message: &str,
        media_path: &Path,
    ) -> Result<PostId, PublishError>;
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Posts statuses to a Mastodon instance.
///
/// Media goes up first through `/api/v2/media`; the returned attachment id
/// is then referenced from `/api/v1/statuses`.
pub struct MastodonSink {
    client: Client,
    instance_url: String,
    access_token: String,
}

impl MastodonSink {
    pub fn new(instance_url: &str, access_token: &str) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    async fn upload_media(&self, media_path: &Path) -> Result<String, PublishError> {
        let bytes = tokio::fs::read(media_path)
            .await
            .map_err(|source| PublishError::Media {
                path: media_path.to_path_buf(),
                source,
            })?;
        let file_name = media_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture.jpg".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/jpeg")
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/api/v2/media", self.instance_url))
            .bearer_auth(&self.access_token)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let created = read_created(response).await?;
        debug!(media.id = %created.id, "Uploaded media attachment");
        Ok(created.id)
    }

    async fn post_status(&self, message: &str, media_ids: &[String]) -> Result<PostId, PublishError> {
        let mut body = json!({ "status": message });
        if !media_ids.is_empty() {
            body["media_ids"] = json!(media_ids);
        }

        let response = self
            .client
            .post(format!("{}/api/v1/statuses", self.instance_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let created = read_created(response).await?;
        info!(post.id = %created.id, post.media = media_ids.len(), "Published status");
        Ok(PostId(created.id))
    }
}

async fn read_created(response: Response) -> Result<Created, PublishError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PublishError::Unauthorized {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PublishError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Created>()
        .await
        .map_err(|e| PublishError::Transport(format!("Failed to parse response: {}", e)))
}

#[async_trait]
impl PublishSink for MastodonSink {
    async fn publish_text(&self, message: &str) -> Result<PostId, PublishError> {
        self.post_status(message, &[]).await
    }

    async fn publish_text_with_media(
        &self,
        message: &str,
        media_path: &Path,
    ) -> Result<PostId, PublishError> {
        let media_id = self.upload_media(media_path).await?;
        self.post_status(message, &[media_id]).await
    }
}

/// Logs posts instead of sending them. Used for `--dry-run`.
#[derive(Default)]
pub struct LogSink {
    next_id: AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> PostId {
        PostId(format!("dry-run-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1))
    }
}

#[async_trait]
impl PublishSink for LogSink {
    async fn publish_text(&self, message: &str) -> Result<PostId, PublishError> {
        let id = self.next();
        info!(post.id = %id, post.message = message, "Dry run: would publish status");
        Ok(id)
    }

    async fn publish_text_with_media(
        &self,
        message: &str,
        media_path: &Path,
    ) -> Result<PostId, PublishError> {
        let id = self.next();
        info!(
            post.id = %id,
            post.message = message,
            post.media = %media_path.display(),
            "Dry run: would publish status with media"
        );
        Ok(id)
    }
}

// src/pipeline/publish.rs

//! Publishing merged artifacts to a versioned content repository.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, Result};
use crate::models::PublishConfig;
use crate::storage::ObjectStore;

const USER_AGENT: &str = concat!("cartelera-crawler/", env!("CARGO_PKG_VERSION"));

/// Resolves an opaque secret id to its value.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn secret(&self, id: &str) -> Result<String>;
}

/// Reads secrets from environment variables named by the id.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretProvider;

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn secret(&self, id: &str) -> Result<String> {
        match std::env::var(id) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            Ok(_) => Err(AppError::secret(id, "value is empty")),
            Err(e) => Err(AppError::secret(id, e)),
        }
    }
}

/// Reference to a published object.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublishedObject {
    pub path: String,
    /// Revision id of the stored content.
    pub revision: String,
    pub url: Option<String>,
    /// False when an existing object was replaced.
    pub created: bool,
}

/// Create-or-update of one object in a content repository.
#[async_trait]
pub trait ContentPublisher: Send + Sync {
    async fn publish(&self, content: Vec<u8>, destination: &str) -> Result<PublishedObject>;
}

#[derive(Debug, Deserialize)]
struct ExistingContent {
    sha: String,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    content: UpdatedContent,
}

#[derive(Debug, Deserialize)]
struct UpdatedContent {
    path: String,
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
}

/// GitHub contents API publisher.
pub struct GithubContentsPublisher {
    client: Client,
    config: PublishConfig,
    secrets: Arc<dyn SecretProvider>,
}

impl GithubContentsPublisher {
    pub fn new(config: &PublishConfig, secrets: Arc<dyn SecretProvider>) -> Result<Self> {
        if config.repository.trim().is_empty() {
            return Err(AppError::config("publish.repository is not set"));
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            secrets,
        })
    }

    /// Repository path of a file inside the destination directory.
    pub fn destination(&self, file_name: &str) -> String {
        let dir = self.config.destination_dir.trim_matches('/');
        if dir.is_empty() {
            file_name.to_string()
        } else {
            format!("{dir}/{file_name}")
        }
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.repository.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Revision id of the current object, if any.
    async fn existing_revision(&self, url: &str, token: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .query(&[("ref", self.config.branch.as_str())])
            .bearer_auth(token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let existing: ExistingContent = response.json().await?;
                Ok(Some(existing.sha))
            }
            status => Err(publish_error(status, response).await),
        }
    }
}

async fn publish_error(status: StatusCode, response: reqwest::Response) -> AppError {
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
    AppError::Publish {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ContentPublisher for GithubContentsPublisher {
    async fn publish(&self, content: Vec<u8>, destination: &str) -> Result<PublishedObject> {
        let token = self.secrets.secret(&self.config.token_secret_id).await?;
        let url = self.contents_url(destination);

        let sha = self.existing_revision(&url, &token).await?;
        let created = sha.is_none();
        let request = UpdateRequest {
            message: &self.config.commit_message,
            content: STANDARD.encode(&content),
            branch: &self.config.branch,
            sha,
        };

        let response = self
            .client
            .put(&url)
            .bearer_auth(&token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(publish_error(status, response).await);
        }
        let updated: UpdateResponse = response.json().await?;

        info!(
            repository = %self.config.repository,
            path = %updated.content.path,
            created,
            bytes = content.len(),
            "artifact published"
        );
        Ok(PublishedObject {
            path: updated.content.path,
            revision: updated.content.sha,
            url: updated.content.html_url,
            created,
        })
    }
}

/// Publish a stored artifact under its file name in the destination directory.
pub async fn publish_stored(
    publisher: &GithubContentsPublisher,
    store: &dyn ObjectStore,
    key: &str,
) -> Result<PublishedObject> {
    let content = store
        .get_object(key)
        .await?
        .ok_or_else(|| AppError::validation(format!("artifact {key} not found")))?;

    let file_name = key.rsplit('/').next().unwrap_or(key);
    publisher
        .publish(content, &publisher.destination(file_name))
        .await
}

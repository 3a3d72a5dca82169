use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{PagePublisher, PublishError, RemoteFile};

const API_BASE: &str = "https://api.github.com";

/// Publishes through the GitHub contents API, one commit per file.
pub struct GithubPublisher {
    client: Client,
    api_base: String,
    repo: String,
    branch: String,
    token: String,
}

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

/// GitHub wraps the base64 of file contents at 60 columns.
fn decode_contents(path: &str, encoded: &str) -> Result<String, PublishError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| PublishError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| PublishError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

impl GithubPublisher {
    pub fn new(
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<GithubPublisher, PublishError> {
        let client = Client::builder()
            .user_agent("watchpage_bot")
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(GithubPublisher {
            client,
            api_base: API_BASE.to_string(),
            repo: repo.into(),
            branch: branch.into(),
            token: token.into(),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.api_base,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn put(
        &self,
        path: &str,
        message: &str,
        content: &str,
        sha: Option<&str>,
    ) -> Result<StatusCode, PublishError> {
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": self.branch,
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }

        let response = self
            .authorized(self.client.put(self.contents_url(path)))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }

        let message = response.text().await.unwrap_or_default();
        // Creating over an existing file is rejected for the missing sha.
        if sha.is_none()
            && (status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::CONFLICT)
        {
            log::debug!("Create of {path} rejected with {status}: {message}");
            return Err(PublishError::AlreadyExists(path.to_string()));
        }
        Err(PublishError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PagePublisher for GithubPublisher {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>, PublishError> {
        let response = self
            .authorized(self.client.get(self.contents_url(path)))
            .query(&[("ref", &self.branch)])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PublishError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let contents: ContentsResponse = response.json().await?;
        Ok(Some(RemoteFile {
            content: decode_contents(path, &contents.content)?,
            revision: contents.sha,
        }))
    }

    async fn create_file(
        &self,
        path: &str,
        message: &str,
        content: &str,
    ) -> Result<(), PublishError> {
        self.put(path, message, content, None).await?;
        log::debug!("Created {path} in {}", self.repo);
        Ok(())
    }

    async fn update_file(
        &self,
        path: &str,
        message: &str,
        content: &str,
        revision: &str,
    ) -> Result<(), PublishError> {
        self.put(path, message, content, Some(revision)).await?;
        log::debug!("Updated {path} in {}", self.repo);
        Ok(())
    }
}

use async_trait::async_trait;
use octocrab::Octocrab;

use crate::config::GitHubConfig;
use crate::error::{GateError, Result};
use crate::platform::RepoMetadata;

pub struct GitHubMetadata {
    client: Octocrab,
    api_path_prefix: String,
}

impl GitHubMetadata {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let mut builder = Octocrab::builder()
            .base_uri(config.url.as_str())
            .map_err(|e| GateError::Config(format!("Invalid GitHub URL {}: {e}", config.url)))?;

        if let Some(token) = config.token.as_ref().filter(|t| !t.is_empty()) {
            builder = builder.personal_token(token.clone());
        }

        let client = builder
            .build()
            .map_err(|e| GateError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;

        Ok(Self {
            client,
            api_path_prefix: config.api_path_prefix.trim_matches('/').to_string(),
        })
    }

    fn repo_route(&self, owner: &str, repo: &str) -> String {
        let owner = urlencoding::encode(owner);
        let repo = urlencoding::encode(repo);
        if self.api_path_prefix.is_empty() {
            format!("/repos/{owner}/{repo}")
        } else {
            format!("/{}/repos/{owner}/{repo}", self.api_path_prefix)
        }
    }
}

#[async_trait]
impl RepoMetadata for GitHubMetadata {
    async fn is_private(&self, owner: &str, repo: &str) -> Result<bool> {
        let route = self.repo_route(owner, repo);
        tracing::debug!(route = %route, "Fetching repository metadata");

        // Status first: proxies in front of GitHub Enterprise answer errors with non-JSON bodies
        let response = self.client._get(route.as_str()).await?;
        let status = response.status();
        let body = self.client.body_to_string(response).await?;

        if !status.is_success() {
            return Err(GateError::Http {
                status: status.as_u16(),
                message: github_error_message(&body),
            });
        }

        let repository: serde_json::Value = serde_json::from_str(&body)?;
        repository["private"].as_bool().ok_or_else(|| {
            GateError::GitHubApi(format!("No visibility in repository response for {owner}/{repo}"))
        })
    }
}

/// GitHub's `message` field when the body is GitHub-shaped, the raw body otherwise.
fn github_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

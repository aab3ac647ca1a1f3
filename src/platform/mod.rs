pub mod github;

use async_trait::async_trait;

use crate::error::Result;

/// Read-only repository metadata from the hosting service.
#[async_trait]
pub trait RepoMetadata: Send + Sync {
    /// Whether `owner/repo` is a private repository.
    async fn is_private(&self, owner: &str, repo: &str) -> Result<bool>;
}

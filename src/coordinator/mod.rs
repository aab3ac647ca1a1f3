pub mod after_all;
pub mod flags;
pub mod travis;

use async_trait::async_trait;

use crate::env::EnvSnapshot;
use crate::error::Result;

pub use after_all::AfterAllCoordinator;
pub use flags::FlagCoordinator;
pub use travis::TravisDeployOnce;

/// Parameters handed to the coordinator for one election.
#[derive(Clone, Default)]
pub struct ElectionOptions {
    /// Repository visibility, when it was looked up.
    pub private: Option<bool>,
    pub github_token: Option<String>,
    pub travis_url: Option<String>,
    pub travis_api_path_prefix: String,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for ElectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectionOptions")
            .field("private", &self.private)
            .field("github_token", &self.github_token.as_ref().map(|_| "[REDACTED]"))
            .field("travis_url", &self.travis_url)
            .field("travis_api_path_prefix", &self.travis_api_path_prefix)
            .finish()
    }
}

/// Elects the single job of a build matrix allowed to publish.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// `Some(true)`: this job leads and every sibling passed.
    /// `Some(false)`: this job leads but a sibling failed.
    /// `None`: another job leads.
    async fn elect(&self, options: &ElectionOptions, env: &EnvSnapshot) -> Result<Option<bool>>;
}

use serde::Deserialize;

use crate::env::EnvSnapshot;
use crate::error::{GateError, Result};

/// Which build-leader protocol decides matrix leadership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinatorKind {
    /// Elect the leader through the Travis API and wait for sibling jobs.
    #[default]
    DeployOnce,
    /// Trust `BUILD_LEADER` / `BUILD_AGGREGATE_STATUS` set by an earlier step.
    Flags,
    /// Run a helper whose exit status is 0 (proceed), 1 (others failed) or 2 (not leader).
    AfterAll,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub coordinator: CoordinatorKind,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub travis: TravisConfig,
    #[serde(default)]
    pub after_all: AfterAllConfig,
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_github_url")]
    pub url: String,
    #[serde(default)]
    pub api_path_prefix: String,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("url", &self.url)
            .field("api_path_prefix", &self.api_path_prefix)
            .finish()
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            url: default_github_url(),
            api_path_prefix: String::new(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct TravisConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_path_prefix: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub build_leader_id: Option<u32>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for TravisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TravisConfig")
            .field("url", &self.url)
            .field("api_path_prefix", &self.api_path_prefix)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("build_leader_id", &self.build_leader_id)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_wait_secs", &self.max_wait_secs)
            .finish()
    }
}

impl Default for TravisConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_path_prefix: String::new(),
            token: None,
            build_leader_id: None,
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AfterAllConfig {
    #[serde(default = "default_after_all_command")]
    pub command: Vec<String>,
}

impl Default for AfterAllConfig {
    fn default() -> Self {
        Self {
            command: default_after_all_command(),
        }
    }
}

fn default_after_all_command() -> Vec<String> {
    vec!["travis-after-all".to_string()]
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_github_url() -> String {
    "https://api.github.com".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            repository_url: None,
            coordinator: CoordinatorKind::default(),
            github: GitHubConfig::default(),
            travis: TravisConfig::default(),
            after_all: AfterAllConfig::default(),
        }
    }
}

impl GateConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("release-gate").required(false));
        }

        // Environment variable overrides with RELEASE_GATE_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("RELEASE_GATE")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.branch.is_empty() {
            return Err(GateError::Config("branch must not be empty".to_string()));
        }
        if self.coordinator == CoordinatorKind::AfterAll && self.after_all.command.is_empty() {
            return Err(GateError::Config("after_all.command must not be empty".to_string()));
        }
        if self.travis.poll_interval_secs == 0 {
            return Err(GateError::Config(
                "travis.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Fill unset tokens and URLs from the conventional CI variables.
    ///
    /// Explicitly configured values always win over the environment.
    pub fn resolve(mut self, env: &EnvSnapshot) -> Self {
        fn fill(slot: &mut Option<String>, env: &EnvSnapshot, names: &[&str]) {
            if slot.as_deref().map_or(true, str::is_empty) {
                if let Some(value) = env.first_of(names) {
                    *slot = Some(value.to_string());
                }
            }
        }

        fill(&mut self.github.token, env, &["GH_TOKEN", "GITHUB_TOKEN"]);
        fill(&mut self.travis.url, env, &["TRAVIS_URL"]);
        fill(&mut self.travis.token, env, &["TRAVIS_TOKEN"]);

        if self.github.url == default_github_url() {
            if let Some(url) = env.first_of(&["GH_URL", "GITHUB_URL"]) {
                self.github.url = url.to_string();
            }
        }
        if self.github.api_path_prefix.is_empty() {
            if let Some(prefix) = env.first_of(&["GH_PREFIX", "GITHUB_PREFIX"]) {
                self.github.api_path_prefix = prefix.to_string();
            }
        }
        if self.travis.api_path_prefix.is_empty() {
            if let Some(prefix) = env.first_of(&["TRAVIS_PREFIX"]) {
                self.travis.api_path_prefix = prefix.to_string();
            }
        }
        if self.travis.build_leader_id.is_none() {
            self.travis.build_leader_id = env
                .get("BUILD_LEADER_ID")
                .and_then(|id| id.trim().parse().ok());
        }

        self
    }

    pub fn github_token(&self) -> Option<&str> {
        self.github.token.as_deref()
    }
}

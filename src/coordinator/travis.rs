use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::TravisConfig;
use crate::coordinator::{Coordinator, ElectionOptions};
use crate::env::{EnvSnapshot, TRAVIS_BUILD_ID, TRAVIS_JOB_NUMBER};
use crate::error::{GateError, Result};

const TRAVIS_PRO_URL: &str = "https://api.travis-ci.com";
const TRAVIS_ORG_URL: &str = "https://api.travis-ci.org";
const API_VERSION: &str = "3";
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deploy-once election through the Travis API.
///
/// The leader is the job numbered `<build>.<build_leader_id>` or, when no id
/// is configured, the highest-numbered job that may not fail. The leader then
/// waits for every sibling to finish and reports whether all of them passed.
pub struct TravisDeployOnce {
    client: Client,
    token: Option<String>,
    build_leader_id: Option<u32>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl TravisDeployOnce {
    pub fn new(config: &TravisConfig) -> Self {
        Self {
            client: Client::new(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            build_leader_id: config.build_leader_id,
            poll_interval: Duration::from_secs(config.poll_interval_secs).max(MIN_POLL_INTERVAL),
            max_wait: config.max_wait_secs.map(Duration::from_secs),
        }
    }

    fn base_url(options: &ElectionOptions) -> String {
        let host = match (&options.travis_url, options.private) {
            (Some(url), _) => url.as_str(),
            (None, Some(true)) => TRAVIS_PRO_URL,
            (None, _) => TRAVIS_ORG_URL,
        };
        let prefix = options.travis_api_path_prefix.trim_matches('/');
        if prefix.is_empty() {
            host.trim_end_matches('/').to_string()
        } else {
            format!("{}/{prefix}", host.trim_end_matches('/'))
        }
    }

    async fn access_token(&self, base_url: &str, options: &ElectionOptions) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }

        let github_token = options
            .github_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                GateError::Coordinator(
                    "No Travis token and no GitHub token to exchange for one".to_string(),
                )
            })?;

        tracing::debug!("Exchanging GitHub token for a Travis access token");

        let response = self
            .client
            .post(format!("{base_url}/auth/github"))
            .json(&GitHubAuthRequest { github_token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GateError::Http {
                status: status.as_u16(),
                message: format!("Travis token exchange failed: {body}"),
            });
        }

        Ok(response.json::<GitHubAuthResponse>().await?.access_token)
    }

    async fn fetch_jobs(&self, base_url: &str, token: &str, build_id: u64) -> Result<Vec<Job>> {
        let response = self
            .client
            .get(format!("{base_url}/build/{build_id}/jobs"))
            .header("Travis-API-Version", API_VERSION)
            .header("Authorization", format!("token {token}"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GateError::Http {
                status: status.as_u16(),
                message: format!("Travis API returned {status}: {body}"),
            });
        }

        Ok(response.json::<JobsResponse>().await?.jobs)
    }
}

#[async_trait]
impl Coordinator for TravisDeployOnce {
    async fn elect(&self, options: &ElectionOptions, env: &EnvSnapshot) -> Result<Option<bool>> {
        let build_id: u64 = env
            .get(TRAVIS_BUILD_ID)
            .and_then(|id| id.trim().parse().ok())
            .ok_or_else(|| GateError::Coordinator(format!("{TRAVIS_BUILD_ID} is missing or invalid")))?;
        let current = env
            .get(TRAVIS_JOB_NUMBER)
            .and_then(job_index)
            .ok_or_else(|| GateError::Coordinator(format!("{TRAVIS_JOB_NUMBER} is missing or invalid")))?;

        if let Some(leader) = self.build_leader_id {
            if current != leader {
                tracing::info!(job = current, leader, "Not the configured build leader");
                return Ok(None);
            }
        }

        let base_url = Self::base_url(options);
        let token = self.access_token(&base_url, options).await?;
        let mut jobs = self.fetch_jobs(&base_url, &token, build_id).await?;

        if self.build_leader_id.is_none() {
            let leader = jobs
                .iter()
                .filter(|job| !job.allow_failure)
                .filter_map(|job| job_index(&job.number))
                .max()
                .ok_or_else(|| {
                    GateError::Coordinator(format!("Build {build_id} has no required jobs"))
                })?;

            if current != leader {
                tracing::info!(job = current, leader, "Not the elected build leader");
                return Ok(None);
            }
        }

        tracing::info!(job = current, build_id, "Elected build leader, waiting for other jobs");

        let started = Instant::now();
        loop {
            let siblings: Vec<&Job> = jobs
                .iter()
                .filter(|job| !job.allow_failure && job_index(&job.number) != Some(current))
                .collect();

            let pending = siblings.iter().filter(|job| !job.is_finished()).count();
            if pending == 0 {
                let all_passed = siblings.iter().all(|job| job.state == "passed");
                tracing::info!(all_passed, jobs = siblings.len(), "All other jobs finished");
                return Ok(Some(all_passed));
            }

            if let Some(max_wait) = self.max_wait {
                if started.elapsed() >= max_wait {
                    return Err(GateError::Coordinator(format!(
                        "Gave up after {}s waiting for {pending} job(s) of build {build_id}",
                        max_wait.as_secs()
                    )));
                }
            }

            tracing::debug!(pending, "Waiting for other jobs to finish");
            tokio::time::sleep(self.poll_interval).await;
            jobs = self.fetch_jobs(&base_url, &token, build_id).await?;
        }
    }
}

/// Job index from a job number such as `"12.3"`.
fn job_index(number: &str) -> Option<u32> {
    number.trim().rsplit_once('.')?.1.parse().ok()
}

// --- API types ---

#[derive(Debug, Serialize)]
struct GitHubAuthRequest<'a> {
    github_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct GitHubAuthResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct Job {
    number: String,
    state: String,
    #[serde(default)]
    allow_failure: bool,
}

impl Job {
    fn is_finished(&self) -> bool {
        matches!(
            self.state.as_str(),
            "passed" | "failed" | "errored" | "canceled"
        )
    }
}

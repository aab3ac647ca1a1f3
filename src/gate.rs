//! The publish decision: ordered environment guards followed by a
//! build-leader election.

use std::sync::Arc;

use serde::Serialize;

use crate::config::GateConfig;
use crate::coordinator::{Coordinator, ElectionOptions};
use crate::env::{EnvSnapshot, TRAVIS, TRAVIS_BRANCH, TRAVIS_PULL_REQUEST, TRAVIS_TAG};
use crate::error::GateError;
use crate::platform::RepoMetadata;
use crate::repo_url::parse_repo_url;

/// Why a build may not publish. These are soft stops, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    NotCi,
    PullRequest,
    GitTag,
    BranchMismatch,
    NotLeader,
    OthersFailed,
    InvalidRepoUrl,
}

impl BlockReason {
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::NotCi => "NOT_CI",
            BlockReason::PullRequest => "PULL_REQUEST",
            BlockReason::GitTag => "GIT_TAG",
            BlockReason::BranchMismatch => "BRANCH_MISMATCH",
            BlockReason::NotLeader => "NOT_LEADER",
            BlockReason::OthersFailed => "OTHERS_FAILED",
            BlockReason::InvalidRepoUrl => "INVALID_REPO_URL",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of one gate evaluation.
#[derive(Debug)]
pub enum Outcome {
    /// This job may publish.
    Proceed,
    /// Publishing is skipped for an expected reason.
    Blocked { reason: BlockReason, message: String },
    /// A collaborator failed; its error is passed through untouched.
    Failed(GateError),
}

impl Outcome {
    fn blocked(reason: BlockReason, message: impl Into<String>) -> Self {
        Outcome::Blocked {
            reason,
            message: message.into(),
        }
    }

    pub fn is_proceed(&self) -> bool {
        matches!(self, Outcome::Proceed)
    }

    /// Stable code for anything but `Proceed`.
    pub fn code(&self) -> Option<String> {
        match self {
            Outcome::Proceed => None,
            Outcome::Blocked { reason, .. } => Some(reason.code().to_string()),
            Outcome::Failed(e) => Some(e.code()),
        }
    }

    pub fn report(&self) -> OutcomeReport {
        match self {
            Outcome::Proceed => OutcomeReport {
                decision: "proceed",
                code: None,
                message: None,
            },
            Outcome::Blocked { reason, message } => OutcomeReport {
                decision: "blocked",
                code: Some(reason.code().to_string()),
                message: Some(message.clone()),
            },
            Outcome::Failed(e) => OutcomeReport {
                decision: "failed",
                code: Some(e.code()),
                message: Some(e.to_string()),
            },
        }
    }
}

/// Serializable summary of an [`Outcome`].
#[derive(Debug, Serialize)]
pub struct OutcomeReport {
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct PublishGate {
    coordinator: Arc<dyn Coordinator>,
    metadata: Option<Arc<dyn RepoMetadata>>,
}

impl PublishGate {
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self {
            coordinator,
            metadata: None,
        }
    }

    /// Look up repository visibility before the election.
    pub fn with_metadata(mut self, metadata: Arc<dyn RepoMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub async fn evaluate(&self, config: &GateConfig, env: &EnvSnapshot) -> Outcome {
        let outcome = self.run(config, env).await;

        match &outcome {
            Outcome::Proceed => tracing::info!("All publish conditions met"),
            Outcome::Blocked { reason, message } => {
                tracing::info!(code = %reason, message = %message, "Publishing blocked")
            }
            Outcome::Failed(e) => tracing::error!(error = %e, "Publish verification failed"),
        }

        outcome
    }

    async fn run(&self, config: &GateConfig, env: &EnvSnapshot) -> Outcome {
        if env.get(TRAVIS) != Some("true") {
            return Outcome::blocked(
                BlockReason::NotCi,
                "Did not run on Travis CI, so a new version won't be published.",
            );
        }

        if env
            .get(TRAVIS_PULL_REQUEST)
            .is_some_and(|pr| pr != "false")
        {
            return Outcome::blocked(
                BlockReason::PullRequest,
                "This run was triggered by a pull request, so a new version won't be published.",
            );
        }

        if let Some(tag) = env.get(TRAVIS_TAG).filter(|t| !t.is_empty()) {
            let mut message =
                "This run was triggered by a git tag, so a new version won't be published."
                    .to_string();
            if is_release_tag(tag) {
                message.push_str(
                    "\nThe tag was very likely created by a previous release of this commit. \
                     See the build that ran before this one for the publish log.",
                );
            }
            return Outcome::blocked(BlockReason::GitTag, message);
        }

        let actual = env.get(TRAVIS_BRANCH).unwrap_or_default();
        if actual != config.branch {
            return Outcome::blocked(
                BlockReason::BranchMismatch,
                format!(
                    "This run was triggered on branch {actual}, but publishing is configured only from {}.",
                    config.branch
                ),
            );
        }

        let mut options = ElectionOptions {
            private: None,
            github_token: config.github.token.clone(),
            travis_url: config.travis.url.clone(),
            travis_api_path_prefix: config.travis.api_path_prefix.clone(),
        };

        if let (Some(metadata), Some(url)) = (&self.metadata, &config.repository_url) {
            let Some(slug) = parse_repo_url(url) else {
                return Outcome::blocked(
                    BlockReason::InvalidRepoUrl,
                    format!("Repository URL {url} does not name an owner and repository."),
                );
            };

            match metadata.is_private(&slug.owner, &slug.repo).await {
                Ok(private) => {
                    tracing::debug!(repo = %slug, private, "Resolved repository visibility");
                    options.private = Some(private);
                }
                Err(e) => return Outcome::Failed(e),
            }
        }

        match self.coordinator.elect(&options, env).await {
            Ok(Some(true)) => Outcome::Proceed,
            Ok(Some(false)) => Outcome::blocked(
                BlockReason::OthersFailed,
                "Not all jobs in the build matrix passed, so a new version won't be published.",
            ),
            Ok(None) => Outcome::blocked(
                BlockReason::NotLeader,
                "This job is not the build leader, so a new version won't be published.",
            ),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Whether `tag` reads as a strict semantic version, allowing a `v` prefix.
fn is_release_tag(tag: &str) -> bool {
    let tag = tag.trim();
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    semver::Version::parse(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::Result;

    enum Reply {
        Elected(Option<bool>),
        Fail(&'static str),
    }

    struct RecordingCoordinator {
        reply: Reply,
        calls: Mutex<Vec<ElectionOptions>>,
    }

    impl RecordingCoordinator {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<ElectionOptions> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Coordinator for RecordingCoordinator {
        async fn elect(&self, options: &ElectionOptions, _env: &EnvSnapshot) -> Result<Option<bool>> {
            self.calls.lock().unwrap().push(options.clone());
            match self.reply {
                Reply::Elected(result) => Ok(result),
                Reply::Fail(msg) => Err(GateError::Coordinator(msg.to_string())),
            }
        }
    }

    struct FakeMetadata {
        status: Option<u16>,
        private: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeMetadata {
        fn private(private: bool) -> Arc<Self> {
            Arc::new(Self {
                status: None,
                private,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status: Some(status),
                private: false,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RepoMetadata for FakeMetadata {
        async fn is_private(&self, owner: &str, repo: &str) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("{owner}/{repo}"));
            match self.status {
                Some(status) => Err(GateError::Http {
                    status,
                    message: "Bad credentials".to_string(),
                }),
                None => Ok(self.private),
            }
        }
    }

    fn config(branch: &str) -> GateConfig {
        GateConfig {
            branch: branch.to_string(),
            ..GateConfig::default()
        }
    }

    fn env(pairs: &[(&str, &str)]) -> EnvSnapshot {
        EnvSnapshot::from_pairs(pairs.iter().copied())
    }

    fn on_master() -> EnvSnapshot {
        env(&[("TRAVIS", "true"), ("TRAVIS_BRANCH", "master")])
    }

    fn reason(outcome: &Outcome) -> Option<BlockReason> {
        match outcome {
            Outcome::Blocked { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_only_runs_on_travis() {
        let coordinator = RecordingCoordinator::new(Reply::Elected(Some(true)));
        let gate = PublishGate::new(coordinator.clone());

        for snapshot in [env(&[]), env(&[("TRAVIS", "false")]), env(&[("TRAVIS", "1")])] {
            let outcome = gate.evaluate(&config("master"), &snapshot).await;
            assert_eq!(reason(&outcome), Some(BlockReason::NotCi));
        }
        assert!(coordinator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pull_request_checked_before_tag_and_branch() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(Some(true))));
        let snapshot = env(&[
            ("TRAVIS", "true"),
            ("TRAVIS_PULL_REQUEST", "105"),
            ("TRAVIS_TAG", "v1.0.0"),
            ("TRAVIS_BRANCH", "other"),
        ]);

        let outcome = gate.evaluate(&config("master"), &snapshot).await;
        assert_eq!(reason(&outcome), Some(BlockReason::PullRequest));
        assert_eq!(outcome.code().as_deref(), Some("PULL_REQUEST"));
    }

    #[tokio::test]
    async fn test_pull_request_false_sentinel_passes() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(Some(true))));
        let snapshot = env(&[
            ("TRAVIS", "true"),
            ("TRAVIS_PULL_REQUEST", "false"),
            ("TRAVIS_BRANCH", "master"),
        ]);

        assert!(gate.evaluate(&config("master"), &snapshot).await.is_proceed());
    }

    #[tokio::test]
    async fn test_semver_tag_adds_note() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(Some(true))));
        let snapshot = env(&[
            ("TRAVIS", "true"),
            ("TRAVIS_PULL_REQUEST", "false"),
            ("TRAVIS_TAG", "v1.0.0"),
        ]);

        match gate.evaluate(&config("master"), &snapshot).await {
            Outcome::Blocked { reason, message } => {
                assert_eq!(reason, BlockReason::GitTag);
                assert!(message.contains("previous release"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_semver_tag_omits_note() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(Some(true))));
        let snapshot = env(&[
            ("TRAVIS", "true"),
            ("TRAVIS_PULL_REQUEST", "false"),
            ("TRAVIS_TAG", "vfoo"),
        ]);

        match gate.evaluate(&config("master"), &snapshot).await {
            Outcome::Blocked { reason, message } => {
                assert_eq!(reason, BlockReason::GitTag);
                assert!(!message.contains("previous release"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_loose_version_tag_omits_note() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(Some(true))));
        let snapshot = env(&[("TRAVIS", "true"), ("TRAVIS_TAG", "=1.0.0")]);

        match gate.evaluate(&config("master"), &snapshot).await {
            Outcome::Blocked { reason, message } => {
                assert_eq!(reason, BlockReason::GitTag);
                assert!(!message.contains("previous release"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_tag_is_ignored() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(Some(true))));
        let snapshot = env(&[
            ("TRAVIS", "true"),
            ("TRAVIS_TAG", ""),
            ("TRAVIS_BRANCH", "master"),
        ]);

        assert!(gate.evaluate(&config("master"), &snapshot).await.is_proceed());
    }

    #[tokio::test]
    async fn test_branch_mismatch_either_direction() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(Some(true))));

        let outcome = gate
            .evaluate(
                &config("master"),
                &env(&[("TRAVIS", "true"), ("TRAVIS_BRANCH", "notmaster")]),
            )
            .await;
        assert_eq!(reason(&outcome), Some(BlockReason::BranchMismatch));

        match gate.evaluate(&config("foo"), &on_master()).await {
            Outcome::Blocked { reason, message } => {
                assert_eq!(reason, BlockReason::BranchMismatch);
                assert!(message.contains("branch master"));
                assert!(message.contains("only from foo"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_branch_is_a_mismatch() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(Some(true))));
        let outcome = gate
            .evaluate(&config("master"), &env(&[("TRAVIS", "true")]))
            .await;
        assert_eq!(reason(&outcome), Some(BlockReason::BranchMismatch));
    }

    #[tokio::test]
    async fn test_coordinator_results() {
        let cases = [
            (Some(true), None),
            (None, Some(BlockReason::NotLeader)),
            (Some(false), Some(BlockReason::OthersFailed)),
        ];

        for (elected, expected) in cases {
            let gate = PublishGate::new(RecordingCoordinator::new(Reply::Elected(elected)));
            let outcome = gate.evaluate(&config("master"), &on_master()).await;
            assert_eq!(reason(&outcome), expected);
            assert_eq!(outcome.is_proceed(), expected.is_none());
        }
    }

    #[tokio::test]
    async fn test_coordinator_error_passes_through() {
        let gate = PublishGate::new(RecordingCoordinator::new(Reply::Fail("ledger unreachable")));

        match gate.evaluate(&config("master"), &on_master()).await {
            Outcome::Failed(GateError::Coordinator(msg)) => assert_eq!(msg, "ledger unreachable"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_election_receives_tokens_and_travis_overrides() {
        let coordinator = RecordingCoordinator::new(Reply::Elected(Some(true)));
        let gate = PublishGate::new(coordinator.clone());

        let mut config = config("master");
        config.github.token = Some("gh-token".to_string());
        config.travis.url = Some("https://travis.example.com".to_string());
        config.travis.api_path_prefix = "api".to_string();

        assert!(gate.evaluate(&config, &on_master()).await.is_proceed());

        let calls = coordinator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].private, None);
        assert_eq!(calls[0].github_token.as_deref(), Some("gh-token"));
        assert_eq!(calls[0].travis_url.as_deref(), Some("https://travis.example.com"));
        assert_eq!(calls[0].travis_api_path_prefix, "api");
    }

    #[tokio::test]
    async fn test_private_repository_parametrizes_election() {
        let coordinator = RecordingCoordinator::new(Reply::Elected(Some(true)));
        let metadata = FakeMetadata::private(true);
        let gate = PublishGate::new(coordinator.clone()).with_metadata(metadata.clone());

        let mut config = config("master");
        config.repository_url = Some("https://github.com/acme/widgets.git".to_string());

        assert!(gate.evaluate(&config, &on_master()).await.is_proceed());
        assert_eq!(*metadata.calls.lock().unwrap(), vec!["acme/widgets".to_string()]);
        assert_eq!(coordinator.calls()[0].private, Some(true));
    }

    #[tokio::test]
    async fn test_lookup_failure_skips_election() {
        let coordinator = RecordingCoordinator::new(Reply::Elected(Some(true)));
        let gate = PublishGate::new(coordinator.clone()).with_metadata(FakeMetadata::failing(401));

        let mut config = config("master");
        config.repository_url = Some("https://github.com/acme/widgets.git".to_string());

        let outcome = gate.evaluate(&config, &on_master()).await;
        assert!(matches!(outcome, Outcome::Failed(GateError::Http { status: 401, .. })));
        assert_eq!(outcome.code().as_deref(), Some("401"));
        assert!(coordinator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_repo_url_skips_network() {
        let coordinator = RecordingCoordinator::new(Reply::Elected(Some(true)));
        let metadata = FakeMetadata::private(false);
        let gate = PublishGate::new(coordinator.clone()).with_metadata(metadata.clone());

        let mut config = config("master");
        config.repository_url = Some("invalid_url".to_string());

        let outcome = gate.evaluate(&config, &on_master()).await;
        assert_eq!(reason(&outcome), Some(BlockReason::InvalidRepoUrl));
        assert!(metadata.calls.lock().unwrap().is_empty());
        assert!(coordinator.calls().is_empty());
    }

    #[test]
    fn test_is_release_tag() {
        assert!(is_release_tag("v1.0.0"));
        assert!(is_release_tag("1.2.3-beta.1"));
        assert!(!is_release_tag("=2.0.0"));
        assert!(!is_release_tag("vfoo"));
        assert!(!is_release_tag("v1.0"));
    }

    #[test]
    fn test_report_serialization() {
        let report = Outcome::Blocked {
            reason: BlockReason::NotLeader,
            message: "not the leader".to_string(),
        }
        .report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["decision"], "blocked");
        assert_eq!(json["code"], "NOT_LEADER");

        let json = serde_json::to_value(Outcome::Proceed.report()).unwrap();
        assert_eq!(json, serde_json::json!({ "decision": "proceed" }));
    }
}

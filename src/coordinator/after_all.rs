use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::AfterAllConfig;
use crate::coordinator::{Coordinator, ElectionOptions};
use crate::env::EnvSnapshot;
use crate::error::{GateError, Result};

/// Leadership decided by an external helper's exit status:
/// `0` proceed, `1` a sibling failed, `2` not the leader.
pub struct AfterAllCoordinator {
    command: Vec<String>,
}

impl AfterAllCoordinator {
    pub fn new(config: &AfterAllConfig) -> Self {
        Self {
            command: config.command.clone(),
        }
    }
}

#[async_trait]
impl Coordinator for AfterAllCoordinator {
    async fn elect(&self, options: &ElectionOptions, env: &EnvSnapshot) -> Result<Option<bool>> {
        let Some((exe, args)) = self.command.split_first() else {
            return Err(GateError::Config("after_all.command is empty".to_string()));
        };

        let mut command = Command::new(exe);
        command
            .args(args)
            .envs(env.iter())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());
        if let Some(token) = &options.github_token {
            command.env("GH_TOKEN", token);
        }

        tracing::debug!(command = %exe, "Waiting for build matrix helper");

        let output = command
            .output()
            .await
            .map_err(|e| GateError::Coordinator(format!("Failed to run {exe}: {e}")))?;

        match output.status.code() {
            Some(0) => Ok(Some(true)),
            Some(1) => Ok(Some(false)),
            Some(2) => Ok(None),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(GateError::Coordinator(format!(
                    "{exe} exited with {}: {}",
                    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")),
                    stderr.trim()
                )))
            }
        }
    }
}

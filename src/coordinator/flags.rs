use async_trait::async_trait;

use crate::coordinator::{Coordinator, ElectionOptions};
use crate::env::{EnvSnapshot, BUILD_AGGREGATE_STATUS, BUILD_LEADER};
use crate::error::Result;

const LEADER_MARKER: &str = "YES";
const OTHERS_SUCCEEDED: &str = "others_succeeded";

/// Leadership decided by flags an earlier build step exported.
///
/// Without `BUILD_LEADER` the build is not cooperating and the job proceeds.
pub struct FlagCoordinator;

#[async_trait]
impl Coordinator for FlagCoordinator {
    async fn elect(&self, _options: &ElectionOptions, env: &EnvSnapshot) -> Result<Option<bool>> {
        let Some(leader) = env.get(BUILD_LEADER) else {
            tracing::debug!("No BUILD_LEADER flag, treating job as sole publisher");
            return Ok(Some(true));
        };

        if leader != LEADER_MARKER {
            return Ok(None);
        }

        Ok(Some(env.get(BUILD_AGGREGATE_STATUS) == Some(OTHERS_SUCCEEDED)))
    }
}

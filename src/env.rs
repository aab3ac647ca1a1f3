use std::collections::BTreeMap;

pub const TRAVIS: &str = "TRAVIS";
pub const TRAVIS_PULL_REQUEST: &str = "TRAVIS_PULL_REQUEST";
pub const TRAVIS_TAG: &str = "TRAVIS_TAG";
pub const TRAVIS_BRANCH: &str = "TRAVIS_BRANCH";
pub const TRAVIS_BUILD_ID: &str = "TRAVIS_BUILD_ID";
pub const TRAVIS_JOB_NUMBER: &str = "TRAVIS_JOB_NUMBER";
pub const BUILD_LEADER: &str = "BUILD_LEADER";
pub const BUILD_AGGREGATE_STATUS: &str = "BUILD_AGGREGATE_STATUS";

/// Read-only view of the CI runner's environment, captured once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment. Non-UTF-8 entries are skipped.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First of `names` that is set to a non-empty value.
    pub fn first_of(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|n| self.get(n))
            .find(|v| !v.is_empty())
    }
}

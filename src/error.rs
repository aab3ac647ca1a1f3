use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Coordinator error: {0}")]
    Coordinator(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GateError {
    /// Stable caller-facing code. HTTP errors report their status.
    pub fn code(&self) -> String {
        match self {
            GateError::Config(_) => "CONFIG".to_string(),
            GateError::Http { status, .. } => status.to_string(),
            GateError::GitHubApi(_) => "GITHUB_API".to_string(),
            GateError::Coordinator(_) => "COORDINATOR".to_string(),
            GateError::Serialization(_) => "SERIALIZATION".to_string(),
            GateError::Transport(_) => "TRANSPORT".to_string(),
        }
    }
}

impl From<octocrab::Error> for GateError {
    fn from(e: octocrab::Error) -> Self {
        match e {
            octocrab::Error::GitHub { source, .. } => GateError::Http {
                status: source.status_code.as_u16(),
                message: source.message,
            },
            other => GateError::GitHubApi(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for GateError {
    fn from(e: config::ConfigError) -> Self {
        GateError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GateError>;

use reqwest::Url;

/// Owner and name of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Extract `owner/repo` from a repository URL.
///
/// Accepts `<scheme>://<host>/<owner>/<repo>[.git]` (including `git+https://`
/// and credentials in the authority) and scp-like `git@host:owner/repo.git`.
pub fn parse_repo_url(raw: &str) -> Option<RepoSlug> {
    let raw = raw.trim();
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => Url::parse(&scp_to_ssh(raw)?).ok()?,
    };
    url.host_str()?;

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    if owner.is_empty() || repo.is_empty() {
        return None;
    }

    Some(RepoSlug {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

/// `git@host:owner/repo` -> `ssh://git@host/owner/repo`
fn scp_to_ssh(raw: &str) -> Option<String> {
    let (authority, path) = raw.split_once(':')?;
    if authority.is_empty() || authority.contains('/') || path.starts_with('/') {
        return None;
    }
    Some(format!("ssh://{authority}/{path}"))
}

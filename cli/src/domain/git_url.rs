//! Git repository URL parsing
//!
//! Accepts `https://host/owner/name(.git)`, `ssh://git@host/owner/name.git`
//! and scp-like `git@host:owner/name.git` forms.

use url::Url;

use crate::error::GitError;

/// A repository on a git server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepository {
    pub scheme: String,
    pub host: String,
    pub owner: String,
    pub name: String,
}

impl GitRepository {
    pub fn parse(git_url: &str) -> Result<Self, GitError> {
        let invalid = || GitError::InvalidUrl {
            url: git_url.to_string(),
        };
        let trimmed = git_url.trim();

        let (scheme, host, path) = if trimmed.contains("://") {
            let url = Url::parse(trimmed).map_err(|_| invalid())?;
            let host = url.host_str().ok_or_else(invalid)?;
            let host = match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            let scheme = match url.scheme() {
                "http" => "http",
                _ => "https",
            };
            (scheme.to_string(), host, url.path().to_string())
        } else {
            // scp-like syntax: [user@]host:owner/name.git
            let (authority, path) = trimmed.split_once(':').ok_or_else(invalid)?;
            let host = authority.rsplit('@').next().unwrap_or(authority);
            ("https".to_string(), host.to_string(), path.to_string())
        };

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let (owner, name) = path.rsplit_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            scheme,
            host,
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// `scheme://host`
    pub fn server_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    /// HTTPS clone URL
    pub fn clone_url(&self) -> String {
        format!("{}/{}.git", self.server_url(), self.full_name())
    }

    /// Same repository name under another owner, as a fork would be
    pub fn with_owner(&self, owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            ..self.clone()
        }
    }
}

/// Embed credentials in an HTTP(S) clone URL
///
/// Other URL forms are returned unchanged.
pub fn authenticated_url(git_url: &str, user: &str, token: &str) -> Result<String, GitError> {
    if token.is_empty() || !(git_url.starts_with("https://") || git_url.starts_with("http://")) {
        return Ok(git_url.to_string());
    }
    let invalid = || GitError::InvalidUrl {
        url: git_url.to_string(),
    };
    let mut url = Url::parse(git_url).map_err(|_| invalid())?;
    let user = if user.is_empty() { "oauth2" } else { user };
    url.set_username(user).map_err(|_| invalid())?;
    url.set_password(Some(token)).map_err(|_| invalid())?;
    Ok(url.to_string())
}

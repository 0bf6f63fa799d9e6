//! Path Resolver - maps a remote repository URL to its place in the backup tree
//!
//! Every repository lives at `<backup_root>/<owner>/<name>`. The owner and name
//! are the last two path segments of the URL, which works for the remote shapes
//! git accepts in practice:
//!
//! - `https://host/owner/name.git`, `ssh://git@host:22/owner/name.git`
//! - `git@host:owner/name.git` (scp-like)
//! - `/srv/git/owner/name.git`, `file:///srv/git/owner/name`

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::SyncError;

/// A repository URL together with the local directory it is backed up to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTarget {
    pub source_url: String,
    pub owner: String,
    pub name: String,
    pub local_path: PathBuf,
}

impl RepositoryTarget {
    /// Display name used to tag log events (owner/name format)
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepositoryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Resolve the local backup directory for `source_url` under `backup_root`
pub fn resolve(source_url: &str, backup_root: &Path) -> Result<RepositoryTarget, SyncError> {
    let url = source_url.trim();
    if url.is_empty() {
        return Err(SyncError::url_parse(source_url, "URL is empty"));
    }
    if url.starts_with('-') {
        return Err(SyncError::url_parse(source_url, "URL must not start with '-'"));
    }

    let repo_path = remote_path(url);
    let segments: Vec<&str> = repo_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let [.., owner, name] = segments[..] else {
        return Err(SyncError::url_parse(
            source_url,
            "expected an owner and a repository name in the path",
        ));
    };

    let name = name.strip_suffix(".git").unwrap_or(name);

    validate_segment(source_url, "owner", owner)?;
    validate_segment(source_url, "name", name)?;

    Ok(RepositoryTarget {
        source_url: url.to_string(),
        owner: owner.to_string(),
        name: name.to_string(),
        local_path: backup_root.join(owner).join(name),
    })
}

/// Strip the scheme and authority (or the scp-style `host:` prefix) from a URL
fn remote_path(url: &str) -> &str {
    if let Some((_, rest)) = url.split_once("://") {
        // Everything up to the first '/' is user/host/port
        return rest.split_once('/').map(|(_, path)| path).unwrap_or("");
    }

    match url.split_once(':') {
        // scp-like syntax only applies when no slash precedes the colon
        Some((host, path)) if !host.contains('/') => path,
        _ => url,
    }
}

fn validate_segment(url: &str, what: &str, segment: &str) -> Result<(), SyncError> {
    if segment.is_empty() {
        return Err(SyncError::url_parse(url, format!("repository {} is empty", what)));
    }
    if segment == "." || segment == ".." {
        return Err(SyncError::url_parse(
            url,
            format!("repository {} '{}' is not a usable directory name", what, segment),
        ));
    }
    if segment.contains('\\') || segment.chars().any(char::is_control) {
        return Err(SyncError::url_parse(
            url,
            format!("repository {} contains unsupported characters", what),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quickcheck_macros::quickcheck;

    fn root() -> PathBuf {
        PathBuf::from("/backups")
    }

    #[test]
    fn test_https_and_scp_urls_resolve_to_same_path() {
        let https = resolve("https://example.com/acme/widget.git", &root()).unwrap();
        let scp = resolve("git@example.com:acme/widget.git", &root()).unwrap();

        assert_eq!(https.local_path, PathBuf::from("/backups/acme/widget"));
        assert_eq!(scp.local_path, https.local_path);
        assert_eq!(https.full_name(), "acme/widget");
    }

    #[test]
    fn test_url_forms() {
        let cases = [
            ("https://github.com/octocat/Hello-World", "octocat", "Hello-World"),
            ("https://github.com/octocat/Hello-World/", "octocat", "Hello-World"),
            ("ssh://git@example.com:2222/acme/widget.git", "acme", "widget"),
            ("git@gitlab.com:group/subgroup/tool.git", "subgroup", "tool"),
            ("file:///srv/git/acme/widget.git", "acme", "widget"),
            ("/srv/git/acme/widget", "acme", "widget"),
            ("example.com/acme/widget.git", "acme", "widget"),
        ];

        for (url, owner, name) in cases {
            let target = resolve(url, &root()).unwrap_or_else(|e| panic!("{}: {}", url, e));
            assert_eq!(target.owner, owner, "owner for {}", url);
            assert_eq!(target.name, name, "name for {}", url);
            assert_eq!(target.local_path, root().join(owner).join(name));
        }
    }

    #[test]
    fn test_source_url_is_kept_trimmed() {
        let target = resolve("  https://example.com/acme/widget.git \n", &root()).unwrap();
        assert_eq!(target.source_url, "https://example.com/acme/widget.git");
    }

    #[test]
    fn test_malformed_urls_are_rejected() {
        for url in [
            "not-a-valid-url",
            "",
            "   ",
            "https://example.com/widget.git",
            "https://example.com",
            "git@example.com:widget.git",
            "https://example.com/acme/.git",
        ] {
            assert_matches!(resolve(url, &root()), Err(SyncError::UrlParse { .. }), "{:?}", url);
        }
    }

    #[test]
    fn test_option_like_urls_are_rejected() {
        for url in ["--upload-pack=touch /tmp/x/acme/widget", "-u/acme/widget", " -c/acme/widget"] {
            assert_matches!(
                resolve(url, &root()),
                Err(SyncError::UrlParse { ref reason, .. }) if reason.contains("'-'"),
                "{:?}",
                url
            );
        }
    }

    #[test]
    fn test_traversal_segments_are_rejected() {
        assert_matches!(
            resolve("https://example.com/../widget.git", &root()),
            Err(SyncError::UrlParse { .. })
        );
        assert_matches!(
            resolve("git@example.com:acme/..", &root()),
            Err(SyncError::UrlParse { .. })
        );
    }

    #[test]
    fn test_same_name_different_owner_does_not_collide() {
        let a = resolve("https://example.com/a/x.git", &root()).unwrap();
        let b = resolve("https://example.com/b/x.git", &root()).unwrap();
        assert_ne!(a.local_path, b.local_path);
    }

    fn simple_segment(raw: &str) -> String {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(24)
            .collect();
        format!("s{}", cleaned)
    }

    #[quickcheck]
    fn prop_resolution_is_deterministic(owner: String, name: String) -> bool {
        let url = format!(
            "https://example.com/{}/{}.git",
            simple_segment(&owner),
            simple_segment(&name)
        );
        resolve(&url, &root()).ok() == resolve(&url, &root()).ok()
    }

    #[quickcheck]
    fn prop_distinct_owners_never_collide(owner_a: String, owner_b: String, name: String) -> bool {
        let (owner_a, owner_b, name) = (
            simple_segment(&owner_a),
            simple_segment(&owner_b),
            simple_segment(&name),
        );
        if owner_a == owner_b {
            return true;
        }

        let a = resolve(&format!("git@example.com:{}/{}.git", owner_a, name), &root());
        let b = resolve(&format!("https://example.com/{}/{}", owner_b, name), &root());
        match (a, b) {
            (Ok(a), Ok(b)) => a.local_path != b.local_path,
            _ => false,
        }
    }
}

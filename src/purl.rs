//! Package-URL synthesis, shared by the vulnerability scanner and the SBOM
//! synthesizer (`spec.md` §4.6/§4.7).

/// Build a PURL from a vendor's source URL and its resolved version
/// (`source_version_tag` if present, else the full `commit_hash`).
pub fn synthesize(url: &str, name: &str, version: &str) -> String {
    let trimmed = url
        .trim_end_matches('/')
        .trim_end_matches(".git");

    if let Some(rest) = strip_host(trimmed, "github.com") {
        if let Some((owner, repo)) = split_owner_repo(rest) {
            return format!("pkg:github/{owner}/{repo}@{version}");
        }
    }
    if let Some(rest) = strip_host(trimmed, "gitlab.com") {
        if let Some((namespace, repo)) = split_namespace_repo(rest) {
            return format!("pkg:gitlab/{namespace}/{repo}@{version}");
        }
    }
    if let Some(rest) = strip_host(trimmed, "bitbucket.org") {
        if let Some((owner, repo)) = split_owner_repo(rest) {
            return format!("pkg:bitbucket/{owner}/{repo}@{version}");
        }
    }

    format!("pkg:generic/{name}@{version}")
}

fn strip_host<'a>(url: &'a str, host: &str) -> Option<&'a str> {
    for scheme in ["https://", "http://", "ssh://git@", "git@"] {
        if let Some(rest) = url.strip_prefix(scheme)
            && let Some(rest) = rest.strip_prefix(host)
        {
            let rest = rest.strip_prefix('/').or_else(|| rest.strip_prefix(':'));
            if let Some(rest) = rest {
                return Some(rest);
            }
        }
    }
    None
}

/// `owner/repo` — exactly two segments.
fn split_owner_repo(path: &str) -> Option<(String, String)> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    let repo = segments.pop()?;
    let owner = segments.pop()?;
    Some((owner.to_string(), repo.to_string()))
}

/// `ns/.../repo` — all segments but the last form the namespace (gitlab
/// supports nested groups).
fn split_namespace_repo(path: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    let repo = segments.last()?.to_string();
    let namespace = segments[..segments.len() - 1].join("/");
    Some((namespace, repo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_url_produces_github_purl() {
        let purl = synthesize("https://github.com/owner/repo.git", "repo", "v1.2.3");
        assert_eq!(purl, "pkg:github/owner/repo@v1.2.3");
    }

    #[test]
    fn gitlab_url_with_nested_group_produces_namespace() {
        let purl = synthesize("https://gitlab.com/group/subgroup/repo", "repo", "abc123");
        assert_eq!(purl, "pkg:gitlab/group/subgroup/repo@abc123");
    }

    #[test]
    fn bitbucket_url_produces_bitbucket_purl() {
        let purl = synthesize("https://bitbucket.org/owner/repo", "repo", "abc123");
        assert_eq!(purl, "pkg:bitbucket/owner/repo@abc123");
    }

    #[test]
    fn unrecognized_host_falls_back_to_generic() {
        let purl = synthesize("https://git.internal.example.com/owner/repo", "myvendor", "abc123");
        assert_eq!(purl, "pkg:generic/myvendor@abc123");
    }

    #[test]
    fn scp_style_github_url_produces_github_purl() {
        let purl = synthesize("git@github.com:owner/repo.git", "repo", "v2.0.0");
        assert_eq!(purl, "pkg:github/owner/repo@v2.0.0");
    }
}

//! Git plumbing: ref parsing and a thin wrapper over the `git` binary.

use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefKind {
    Heads,
    Tags,
    Pull,
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitRef {
    pub kind: RefKind,
    pub name: String,
}

/// Parses `refs/<kind>/<name>`, e.g. `refs/heads/dapplion/feat1`.
pub fn parse_ref(ref_str: &str) -> Result<GitRef> {
    let rest = ref_str
        .strip_prefix("refs/")
        .ok_or_else(|| Error::git(format!("invalid ref {ref_str}")))?;
    let (kind, name) = rest
        .split_once('/')
        .ok_or_else(|| Error::git(format!("invalid ref {ref_str}")))?;
    if !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::git(format!("invalid ref {ref_str}")));
    }
    let kind = match kind {
        "heads" => RefKind::Heads,
        "tags" => RefKind::Tags,
        "pull" => RefKind::Pull,
        other => RefKind::Other(other.to_string()),
    };
    Ok(GitRef {
        kind,
        name: name.to_string(),
    })
}

pub fn parse_branch_from_ref(ref_str: &str) -> Result<String> {
    let git_ref = parse_ref(ref_str)?;
    match git_ref.kind {
        RefKind::Heads => Ok(git_ref.name),
        RefKind::Pull => Err(Error::git(
            "merge commit not supported, make sure to checkout the head branch commit",
        )),
        RefKind::Tags => Err(Error::git(
            "running on tags not supported, trigger on push events only",
        )),
        RefKind::Other(kind) => Err(Error::git(format!(
            "ref type '{kind}' not supported: {ref_str}"
        ))),
    }
}

fn git(args: &[&str]) -> Result<String> {
    debug!(?args, "git");
    let output = Command::new("git").args(args).output()?;
    if !output.status.success() {
        return Err(Error::git(format!(
            "git {} exited with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Full hash of `HEAD`.
pub fn current_commit_sha() -> Result<String> {
    git(&["show", "-s", "--format=%H"])
}

/// Full ref `HEAD` points at, e.g. `refs/heads/main`.
pub fn head_ref() -> Result<String> {
    git(&["symbolic-ref", "HEAD"])
}

/// Best guess of the repository default branch from local and remote branch names.
pub fn guess_local_default_branch() -> Result<String> {
    let out = git(&["branch", "--all", "--format=%(refname:short)"])?;
    let branches: Vec<&str> = out.lines().map(str::trim).collect();
    pick_default_branch(&branches).ok_or_else(|| {
        Error::git("could not figure out local default branch, use the persistBranches option")
    })
}

fn pick_default_branch(branches: &[&str]) -> Option<String> {
    ["main", "master"]
        .into_iter()
        .find(|&candidate| {
            branches
                .iter()
                .any(|&b| b == candidate || b.strip_prefix("origin/") == Some(candidate))
        })
        .map(str::to_string)
}

/// Commit hash exported by CI or build scripts, trimmed to 12 chars.
pub fn sha_from_env() -> Option<String> {
    std::env::var("GIT_SHA")
        .ok()
        .or_else(|| std::env::var("GITHUB_SHA").ok())
        .map(|s| s.chars().take(12).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ref() {
        let r = parse_ref("refs/heads/dapplion/feat1").unwrap();
        assert_eq!(r.kind, RefKind::Heads);
        assert_eq!(r.name, "dapplion/feat1");

        let r = parse_ref("refs/tags/v1.0.0").unwrap();
        assert_eq!(r.kind, RefKind::Tags);

        assert!(parse_ref("main").is_err());
        assert!(parse_ref("refs/heads").is_err());
    }

    #[test]
    fn test_parse_branch_from_ref() {
        assert_eq!(parse_branch_from_ref("refs/heads/main").unwrap(), "main");
        assert!(matches!(
            parse_branch_from_ref("refs/pull/12/merge"),
            Err(Error::Git(_))
        ));
        assert!(parse_branch_from_ref("refs/tags/v1").is_err());
        assert!(parse_branch_from_ref("refs/remotes/origin/main").is_err());
    }

    #[test]
    fn test_pick_default_branch() {
        assert_eq!(
            pick_default_branch(&["feat", "origin/master"]),
            Some("master".to_string())
        );
        assert_eq!(
            pick_default_branch(&["master", "main"]),
            Some("main".to_string())
        );
        assert_eq!(pick_default_branch(&["dev", "origin/dev"]), None);
    }
}

//! CI event context, read from the GitHub Actions environment.
//!
//! Actions stores the webhook payload of the triggering event as JSON at
//! `$GITHUB_EVENT_PATH`; only the fields needed to pick a baseline are decoded.

use std::env;
use std::fs;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::git;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CiEvent {
    PullRequest {
        number: u64,
        /// Target branch of the PR, already a plain branch name.
        base_ref: String,
        head_ref: String,
    },
    Push {
        /// Full pushed ref, `refs/heads/<branch>`.
        git_ref: String,
        /// Tip of the ref before the push.
        before: String,
    },
    Other(String),
}

impl CiEvent {
    pub fn name(&self) -> &str {
        match self {
            CiEvent::PullRequest { .. } => "pull_request",
            CiEvent::Push { .. } => "push",
            CiEvent::Other(name) => name,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CiContext {
    pub event: Option<CiEvent>,
    /// `GITHUB_REF`
    pub git_ref: Option<String>,
    /// `GITHUB_SHA`
    pub sha: Option<String>,
    /// `owner/repo`
    pub repository: Option<String>,
}

#[derive(Deserialize)]
struct PrBase {
    #[serde(rename = "ref")]
    git_ref: String,
}

#[derive(Deserialize)]
struct PullRequestObject {
    base: PrBase,
    head: PrBase,
}

#[derive(Deserialize)]
struct PullRequestPayload {
    number: u64,
    pull_request: PullRequestObject,
}

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    before: String,
}

impl CiContext {
    /// Context of a run outside CI.
    pub fn local() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
        let Some(event_name) = var("GITHUB_EVENT_NAME") else {
            return Ok(Self::local());
        };
        let payload = match var("GITHUB_EVENT_PATH") {
            Some(path) => fs::read_to_string(path)?,
            None => {
                return Err(Error::config(
                    "not in a Github Actions context, no GITHUB_EVENT_PATH",
                ))
            }
        };
        Self::from_event(
            &event_name,
            &payload,
            var("GITHUB_REF"),
            var("GITHUB_SHA"),
            var("GITHUB_REPOSITORY"),
        )
    }

    pub fn from_event(
        event_name: &str,
        payload: &str,
        git_ref: Option<String>,
        sha: Option<String>,
        repository: Option<String>,
    ) -> Result<Self> {
        let event = match event_name {
            "pull_request" => {
                let data: PullRequestPayload = serde_json::from_str(payload)?;
                CiEvent::PullRequest {
                    number: data.number,
                    base_ref: data.pull_request.base.git_ref,
                    head_ref: data.pull_request.head.git_ref,
                }
            }
            "push" => {
                let data: PushPayload = serde_json::from_str(payload)?;
                CiEvent::Push {
                    git_ref: data.git_ref,
                    before: data.before,
                }
            }
            other => CiEvent::Other(other.to_string()),
        };
        Ok(Self {
            event: Some(event),
            git_ref,
            sha,
            repository,
        })
    }

    pub fn is_ci(&self) -> bool {
        self.event.is_some()
    }

    /// Branch the measured code lives on.
    pub fn current_branch(&self) -> Result<String> {
        match &self.event {
            Some(CiEvent::PullRequest { head_ref, .. }) => Ok(head_ref.clone()),
            Some(CiEvent::Push { git_ref, .. }) => git::parse_branch_from_ref(git_ref),
            _ => match &self.git_ref {
                Some(git_ref) => git::parse_branch_from_ref(git_ref),
                None => git::parse_branch_from_ref(&git::head_ref()?),
            },
        }
    }
}

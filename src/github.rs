//! Minimal GitHub REST client for reports and repository metadata.

use std::env;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::ci::{CiContext, CiEvent};
use crate::error::{Error, Result};
use crate::render::render_comment;
use crate::schema::BenchmarkComparison;

/// Appended to PR comments so a later run can find and edit its own comment.
pub const PR_COMMENT_TAG: &str = "<!-- benchmarkbot/tag -->";

const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Deserialize)]
struct Repo {
    default_branch: String,
}

#[derive(Deserialize)]
struct IssueComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    api_url: String,
    token: String,
    repository: String,
}

impl GithubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>, repository: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("bench-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            repository: repository.into(),
        })
    }

    /// Builds a client from `GITHUB_TOKEN`, `GITHUB_API_URL` and the CI repository.
    pub fn from_env(ci: &CiContext) -> Result<Self> {
        let token = env::var("GITHUB_TOKEN").map_err(|_| Error::github("ENV GITHUB_TOKEN not set"))?;
        let repository = ci
            .repository
            .clone()
            .ok_or_else(|| Error::github("empty GITHUB_REPOSITORY"))?;
        let api_url = env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::new(api_url, token, repository)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{}", self.api_url, self.repository, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }

    pub fn default_branch(&self) -> Result<String> {
        let repo: Repo = self
            .authed(self.http.get(self.url("")))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(repo.default_branch)
    }

    /// Edits the previous tagged comment on the PR, or creates one.
    pub fn comment_to_pr_updatable(&self, pr_number: u64, body: &str) -> Result<()> {
        let body_with_tag = format!("{body}\n\n{PR_COMMENT_TAG}");

        let comments: Vec<IssueComment> = self
            .authed(self.http.get(self.url(&format!("/issues/{pr_number}/comments"))))
            .query(&[("per_page", "100")])
            .send()?
            .error_for_status()?
            .json()?;
        let prev = comments
            .iter()
            .find(|c| c.body.as_deref().is_some_and(|b| b.contains(PR_COMMENT_TAG)));

        let req = match prev {
            Some(comment) => self
                .http
                .patch(self.url(&format!("/issues/comments/{}", comment.id))),
            None => self
                .http
                .post(self.url(&format!("/issues/{pr_number}/comments"))),
        };
        self.authed(req)
            .json(&json!({ "body": body_with_tag }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    pub fn comment_to_commit(&self, commit_sha: &str, body: &str) -> Result<()> {
        self.authed(
            self.http
                .post(self.url(&format!("/commits/{commit_sha}/comments"))),
        )
        .json(&json!({ "body": body }))
        .send()?
        .error_for_status()?;
        Ok(())
    }

    /// PRs always get a report; pushes only when something regressed.
    pub fn post_report(&self, ci: &CiContext, comparison: &BenchmarkComparison) -> Result<()> {
        match &ci.event {
            Some(CiEvent::PullRequest { number, .. }) => {
                info!(pr = number, "posting benchmark report");
                self.comment_to_pr_updatable(*number, &render_comment(comparison))
            }
            Some(CiEvent::Push { .. }) => {
                if comparison.some_failed {
                    let sha = ci.sha.as_deref().unwrap_or(&comparison.curr_commit_sha);
                    info!(commit = sha, "posting regression report");
                    self.comment_to_commit(sha, &render_comment(comparison))?;
                }
                Ok(())
            }
            Some(other) => Err(Error::github(format!("event not supported {}", other.name()))),
            None => Ok(()),
        }
    }
}

//! CI provider detection and SCM context extraction.
//!
//! Each supported provider exposes the branch, commit and repository
//! coordinates through its own set of environment variables. [`Provider`]
//! selects which set [`ScmContext::from_env`] reads.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EnvSnapshot;
use crate::error::{Result, ScanError};
use crate::request::ScanRequest;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GITLAB_API_URL: &str = "https://gitlab.com/api/v4";

/// GitHub events that carry a pull request.
const GITHUB_PR_EVENTS: &[&str] = &["pull_request", "pull_request_target"];

/// Hosting platform the CI job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    GitLab,
}

impl Provider {
    /// Detect the provider from the marker variables each CI system sets.
    pub fn detect(env: &EnvSnapshot) -> Result<Self> {
        if env.get("GITHUB_ACTIONS") == Some("true") {
            Ok(Provider::GitHub)
        } else if env.get("GITLAB_CI") == Some("true") {
            Ok(Provider::GitLab)
        } else {
            Err(ScanError::UnsupportedEnvironment)
        }
    }

    /// Value sent to the backend as `scm_provider`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::GitLab => "gitlab",
        }
    }

    /// Variable holding the token used to comment on PRs/MRs.
    pub fn token_variable(&self) -> &'static str {
        match self {
            Provider::GitHub => "GITHUB_TOKEN",
            Provider::GitLab => "GITLAB_TOKEN",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pull or merge request that triggered the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewTarget {
    GitHubPullRequest {
        api_url: String,
        /// `owner/repo`
        repository: String,
        number: u64,
    },
    GitLabMergeRequest {
        api_url: String,
        project_id: String,
        iid: u64,
    },
}

/// Commit and repository coordinates of the current CI job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmContext {
    pub provider: Provider,
    pub branch: String,
    pub commit: String,
    pub clone_url: String,
    pub url: String,
    pub repository_id: i64,
    pub repository_name: String,
    /// Present only when the job runs for a pull/merge request.
    pub review: Option<ReviewTarget>,
}

impl ScmContext {
    /// Extract the context for `provider`, failing on the first missing variable.
    pub fn from_env(provider: Provider, env: &EnvSnapshot) -> Result<Self> {
        match provider {
            Provider::GitHub => github_context(env),
            Provider::GitLab => gitlab_context(env),
        }
    }

    /// Whether the job was triggered by a pull/merge request.
    pub fn is_review_event(&self) -> bool {
        self.review.is_some()
    }

    /// Build the payload for the scan trigger endpoint.
    pub fn scan_request(&self, asset_id: Option<String>) -> ScanRequest {
        ScanRequest {
            branch: self.branch.clone(),
            commit: self.commit.clone(),
            scm_provider: self.provider.as_str().to_string(),
            clone_url: self.clone_url.clone(),
            url: self.url.clone(),
            scm_repository_id: self.repository_id,
            repository_name: self.repository_name.clone(),
            asset_id,
        }
    }
}

fn parse_repository_id(name: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>().map_err(|e| ScanError::InvalidVariable {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn github_context(env: &EnvSnapshot) -> Result<ScmContext> {
    let repository = env.require("GITHUB_REPOSITORY")?;
    let server_url = env.require("GITHUB_SERVER_URL")?.trim_end_matches('/');
    let repository_id = parse_repository_id(
        "GITHUB_REPOSITORY_ID",
        env.require("GITHUB_REPOSITORY_ID")?,
    )?;
    let git_ref = env.require("GITHUB_REF")?;

    let is_pr_event = env
        .get("GITHUB_EVENT_NAME")
        .map(|name| GITHUB_PR_EVENTS.contains(&name))
        .unwrap_or(false);
    let payload = if is_pr_event {
        env.get("GITHUB_EVENT_PATH").and_then(read_event_payload)
    } else {
        None
    };

    let branch = match env.get("GITHUB_HEAD_REF") {
        Some(head_ref) => head_ref.to_string(),
        None => git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(git_ref)
            .to_string(),
    };

    let head_sha = payload
        .as_ref()
        .and_then(|p| p.pointer("/pull_request/head/sha"))
        .and_then(Value::as_str);
    let commit = match head_sha {
        Some(sha) => sha.to_string(),
        None => env.require("GITHUB_SHA")?.to_string(),
    };

    let review = if is_pr_event {
        let number = payload
            .as_ref()
            .and_then(|p| p.pointer("/pull_request/number"))
            .and_then(Value::as_u64)
            .or_else(|| pull_number_from_ref(git_ref));
        match number {
            Some(number) => Some(ReviewTarget::GitHubPullRequest {
                api_url: env
                    .get("GITHUB_API_URL")
                    .unwrap_or(DEFAULT_GITHUB_API_URL)
                    .trim_end_matches('/')
                    .to_string(),
                repository: repository.to_string(),
                number,
            }),
            None => {
                warn!(git_ref = %git_ref, "pull request event without a resolvable PR number");
                None
            }
        }
    } else {
        None
    };

    let repository_name = repository
        .rsplit('/')
        .next()
        .unwrap_or(repository)
        .to_string();

    Ok(ScmContext {
        provider: Provider::GitHub,
        branch,
        commit,
        clone_url: format!("{server_url}/{repository}.git"),
        url: format!("{server_url}/{repository}"),
        repository_id,
        repository_name,
        review,
    })
}

fn gitlab_context(env: &EnvSnapshot) -> Result<ScmContext> {
    let project_id = env.require("CI_PROJECT_ID")?;
    let repository_id = parse_repository_id("CI_PROJECT_ID", project_id)?;

    let review = match env.get("CI_MERGE_REQUEST_IID") {
        Some(raw) => {
            let iid = raw
                .parse::<u64>()
                .map_err(|e| ScanError::InvalidVariable {
                    name: "CI_MERGE_REQUEST_IID".to_string(),
                    reason: e.to_string(),
                })?;
            Some(ReviewTarget::GitLabMergeRequest {
                api_url: env
                    .get("CI_API_V4_URL")
                    .unwrap_or(DEFAULT_GITLAB_API_URL)
                    .trim_end_matches('/')
                    .to_string(),
                project_id: project_id.to_string(),
                iid,
            })
        }
        None => None,
    };

    Ok(ScmContext {
        provider: Provider::GitLab,
        branch: env.require("CI_COMMIT_REF_NAME")?.to_string(),
        commit: env.require("CI_COMMIT_SHA")?.to_string(),
        clone_url: env.require("CI_REPOSITORY_URL")?.to_string(),
        url: env.require("CI_PROJECT_URL")?.to_string(),
        repository_id,
        repository_name: env.require("CI_PROJECT_NAME")?.to_string(),
        review,
    })
}

/// `refs/pull/42/merge` -> `42`
fn pull_number_from_ref(git_ref: &str) -> Option<u64> {
    git_ref
        .strip_prefix("refs/pull/")
        .and_then(|rest| rest.split('/').next())
        .and_then(|n| n.parse().ok())
}

fn read_event_payload(path: &str) -> Option<Value> {
    let raw = match std::fs::read(Path::new(path)) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(path = %path, error = %e, "event payload unreadable");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(path = %path, error = %e, "event payload is not valid JSON");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn github_env() -> EnvSnapshot {
        EnvSnapshot::from_pairs([
            ("GITHUB_ACTIONS", "true"),
            ("GITHUB_REPOSITORY", "acme/widgets"),
            ("GITHUB_SERVER_URL", "https://github.com"),
            ("GITHUB_REPOSITORY_ID", "123456"),
            ("GITHUB_SHA", "deadbeef"),
            ("GITHUB_REF", "refs/heads/main"),
            ("GITHUB_EVENT_NAME", "push"),
        ])
    }

    fn gitlab_env() -> EnvSnapshot {
        EnvSnapshot::from_pairs([
            ("GITLAB_CI", "true"),
            ("CI_COMMIT_REF_NAME", "feature/login"),
            ("CI_COMMIT_SHA", "cafebabe"),
            ("CI_REPOSITORY_URL", "https://gitlab.com/acme/widgets.git"),
            ("CI_PROJECT_URL", "https://gitlab.com/acme/widgets"),
            ("CI_PROJECT_ID", "77"),
            ("CI_PROJECT_NAME", "widgets"),
        ])
    }

    #[test]
    fn test_detect_provider() {
        assert_eq!(Provider::detect(&github_env()).unwrap(), Provider::GitHub);
        assert_eq!(Provider::detect(&gitlab_env()).unwrap(), Provider::GitLab);
        assert!(matches!(
            Provider::detect(&EnvSnapshot::default()),
            Err(ScanError::UnsupportedEnvironment)
        ));
    }

    #[test]
    fn test_github_push_context() {
        let ctx = ScmContext::from_env(Provider::GitHub, &github_env()).unwrap();
        assert_eq!(ctx.branch, "main");
        assert_eq!(ctx.commit, "deadbeef");
        assert_eq!(ctx.clone_url, "https://github.com/acme/widgets.git");
        assert_eq!(ctx.url, "https://github.com/acme/widgets");
        assert_eq!(ctx.repository_name, "widgets");
        assert_eq!(ctx.repository_id, 123456);
        assert!(!ctx.is_review_event());
    }

    #[test]
    fn test_github_pull_request_uses_event_payload() {
        let mut payload = NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut payload,
            br#"{"pull_request": {"number": 42, "head": {"sha": "feedface"}}}"#,
        )
        .unwrap();

        let env = github_env()
            .with("GITHUB_EVENT_NAME", "pull_request")
            .with("GITHUB_HEAD_REF", "feature/login")
            .with("GITHUB_REF", "refs/pull/42/merge")
            .with("GITHUB_EVENT_PATH", payload.path().to_str().unwrap());
        let ctx = ScmContext::from_env(Provider::GitHub, &env).unwrap();

        assert_eq!(ctx.branch, "feature/login");
        assert_eq!(ctx.commit, "feedface");
        assert_eq!(
            ctx.review,
            Some(ReviewTarget::GitHubPullRequest {
                api_url: DEFAULT_GITHUB_API_URL.to_string(),
                repository: "acme/widgets".to_string(),
                number: 42,
            })
        );
    }

    #[test]
    fn test_github_pull_request_falls_back_to_ref() {
        let env = github_env()
            .with("GITHUB_EVENT_NAME", "pull_request")
            .with("GITHUB_REF", "refs/pull/7/merge")
            .with("GITHUB_API_URL", "https://ghe.example.com/api/v3/");
        let ctx = ScmContext::from_env(Provider::GitHub, &env).unwrap();

        assert_eq!(ctx.commit, "deadbeef");
        match ctx.review {
            Some(ReviewTarget::GitHubPullRequest {
                api_url, number, ..
            }) => {
                assert_eq!(api_url, "https://ghe.example.com/api/v3");
                assert_eq!(number, 7);
            }
            other => panic!("unexpected review target: {other:?}"),
        }
    }

    #[test]
    fn test_github_missing_variable() {
        let env = EnvSnapshot::from_pairs([("GITHUB_ACTIONS", "true")]);
        let err = ScmContext::from_env(Provider::GitHub, &env).unwrap_err();
        assert!(matches!(err, ScanError::MissingVariable(ref v) if v == "GITHUB_REPOSITORY"));
    }

    #[test]
    fn test_github_invalid_repository_id() {
        let env = github_env().with("GITHUB_REPOSITORY_ID", "not-a-number");
        let err = ScmContext::from_env(Provider::GitHub, &env).unwrap_err();
        assert!(matches!(err, ScanError::InvalidVariable { ref name, .. } if name == "GITHUB_REPOSITORY_ID"));
    }

    #[test]
    fn test_gitlab_branch_pipeline() {
        let ctx = ScmContext::from_env(Provider::GitLab, &gitlab_env()).unwrap();
        assert_eq!(ctx.branch, "feature/login");
        assert_eq!(ctx.commit, "cafebabe");
        assert_eq!(ctx.repository_id, 77);
        assert_eq!(ctx.repository_name, "widgets");
        assert!(ctx.review.is_none());
    }

    #[test]
    fn test_gitlab_merge_request_pipeline() {
        let env = gitlab_env().with("CI_MERGE_REQUEST_IID", "5");
        let ctx = ScmContext::from_env(Provider::GitLab, &env).unwrap();
        assert_eq!(
            ctx.review,
            Some(ReviewTarget::GitLabMergeRequest {
                api_url: DEFAULT_GITLAB_API_URL.to_string(),
                project_id: "77".to_string(),
                iid: 5,
            })
        );
    }

    #[test]
    fn test_values_are_trimmed() {
        let env = gitlab_env().with("CI_COMMIT_SHA", "  cafebabe\n");
        let ctx = ScmContext::from_env(Provider::GitLab, &env).unwrap();
        assert_eq!(ctx.commit, "cafebabe");
    }

    #[test]
    fn test_pull_number_from_ref() {
        assert_eq!(pull_number_from_ref("refs/pull/13/merge"), Some(13));
        assert_eq!(pull_number_from_ref("refs/heads/main"), None);
    }
}

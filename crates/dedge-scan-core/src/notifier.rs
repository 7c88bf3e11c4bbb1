//! PR/MR comment posting.
//!
//! Every status message is printed as a console banner. When the job runs
//! for a pull/merge request and a platform token is available, the message
//! is also posted as a comment. Comment failures are logged and never
//! affect the run.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::client::{build_http_client, upstream_error};
use crate::context::{ReviewTarget, ScmContext};
use crate::error::{Result, ScanError};
use crate::messages;

/// Destination for status comments.
#[async_trait]
pub trait CommentSink: Send + Sync {
    /// Create one comment with `body`.
    async fn post_comment(&self, body: &str) -> Result<()>;

    /// Short description of where comments go, for logs.
    fn target(&self) -> String;
}

/// Issue comments on a GitHub pull request.
pub struct GitHubComments {
    api_url: String,
    repository: String,
    number: u64,
    token: String,
    http: reqwest::Client,
}

impl GitHubComments {
    pub fn new(api_url: &str, repository: &str, number: u64, token: &str) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            number,
            token: token.to_string(),
            http: build_http_client()?,
        })
    }

    fn comments_url(&self) -> String {
        format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_url, self.repository, self.number
        )
    }
}

#[async_trait]
impl CommentSink for GitHubComments {
    async fn post_comment(&self, body: &str) -> Result<()> {
        let response = self
            .http
            .post(self.comments_url())
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "body": body }))
            .send()
            .await
            .map_err(|e| ScanError::Comment(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ScanError::Comment(upstream_error(status, &text)));
        }
        Ok(())
    }

    fn target(&self) -> String {
        format!("{}#{}", self.repository, self.number)
    }
}

/// Notes on a GitLab merge request.
pub struct GitLabNotes {
    api_url: String,
    project_id: String,
    iid: u64,
    token: String,
    http: reqwest::Client,
}

impl GitLabNotes {
    pub fn new(api_url: &str, project_id: &str, iid: u64, token: &str) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            iid,
            token: token.to_string(),
            http: build_http_client()?,
        })
    }

    fn notes_url(&self) -> String {
        format!(
            "{}/projects/{}/merge_requests/{}/notes",
            self.api_url, self.project_id, self.iid
        )
    }
}

#[async_trait]
impl CommentSink for GitLabNotes {
    async fn post_comment(&self, body: &str) -> Result<()> {
        let response = self
            .http
            .post(self.notes_url())
            .header("PRIVATE-TOKEN", &self.token)
            .json(&json!({ "body": body }))
            .send()
            .await
            .map_err(|e| ScanError::Comment(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ScanError::Comment(upstream_error(status, &text)));
        }
        Ok(())
    }

    fn target(&self) -> String {
        format!("project {} !{}", self.project_id, self.iid)
    }
}

/// Build the comment sink for a review target.
pub fn comment_sink(review: &ReviewTarget, token: &str) -> Result<Box<dyn CommentSink>> {
    let sink: Box<dyn CommentSink> = match review {
        ReviewTarget::GitHubPullRequest {
            api_url,
            repository,
            number,
        } => Box::new(GitHubComments::new(api_url, repository, *number, token)?),
        ReviewTarget::GitLabMergeRequest {
            api_url,
            project_id,
            iid,
        } => Box::new(GitLabNotes::new(api_url, project_id, *iid, token)?),
    };
    Ok(sink)
}

/// Prints status messages and mirrors them to the PR/MR when possible.
pub struct Notifier {
    sink: Option<Box<dyn CommentSink>>,
}

impl Notifier {
    pub fn new(sink: Option<Box<dyn CommentSink>>) -> Self {
        Self { sink }
    }

    /// Console output only.
    pub fn console_only() -> Self {
        Self::new(None)
    }

    /// Comment on the context's PR/MR if there is one and a token is set.
    pub fn for_context(context: &ScmContext, token: Option<&str>) -> Result<Self> {
        let Some(review) = &context.review else {
            return Ok(Self::console_only());
        };
        match token {
            Some(token) => Ok(Self::new(Some(comment_sink(review, token)?))),
            None => {
                info!(
                    token = context.provider.token_variable(),
                    "Skipping comment posting as the platform token is not set"
                );
                Ok(Self::console_only())
            }
        }
    }

    /// Whether messages will be posted as comments.
    pub fn posts_comments(&self) -> bool {
        self.sink.is_some()
    }

    /// Print `message` and post it as a comment.
    ///
    /// Returns `true` only if a comment was created.
    pub async fn announce(&self, message: &str) -> bool {
        println!("{}", messages::framed(message));

        let Some(sink) = &self.sink else {
            return false;
        };
        match sink.post_comment(message).await {
            Ok(()) => {
                info!(event = "comment.posted", destination = %sink.target());
                true
            }
            Err(e) => {
                warn!(event = "comment.failed", destination = %sink.target(), error = %e);
                false
            }
        }
    }
}

//! Change publication: push a run's commits with a bounded retry.
//!
//! "Nothing to push" is a successful outcome with zero new commits, never a
//! failure. Only exhausting every attempt is an error, and it can be
//! reported on the task the branch belongs to.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::spawn_blocking;

use crate::config::CoordinatorConfig;
use crate::core::TaskId;
use crate::error::{Error, Result};
use crate::git::GitOps;
use crate::tracker::{find_or_create_comment, marker, IssueTracker};
use crate::{clog, clog_debug, clog_warn};

const GIT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

pub const PUBLISH_FAILURE_MARKER_KIND: &str = "publish-failure";

#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, repo: &Path, branch: &str) -> Result<()>;
}

/// Pushes with the `git` executable found on `PATH`.
pub struct GitCliPusher {
    git: PathBuf,
    remote: String,
}

impl GitCliPusher {
    pub fn new(remote: &str) -> Result<Self> {
        let git = which::which("git")
            .map_err(|e| Error::Validation(format!("git executable not found: {}", e)))?;
        Ok(Self {
            git,
            remote: remote.to_string(),
        })
    }
}

#[async_trait]
impl Pusher for GitCliPusher {
    async fn push(&self, repo: &Path, branch: &str) -> Result<()> {
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        clog_debug!("git push {} {} in {}", self.remote, refspec, repo.display());
        let output = Command::new(&self.git)
            .current_dir(repo)
            .args(["push", &self.remote, &refspec])
            .output()
            .await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::Publish {
            attempts: 1,
            message: stderr.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub success: bool,
    pub new_commits: usize,
    /// Push attempts made; zero when there was nothing to push.
    pub attempts: u32,
}

impl PublishOutcome {
    /// `key=value` lines for a CI step-output file.
    pub fn output_lines(&self) -> String {
        format!("success={}\nnew_commits={}\n", self.success, self.new_commits)
    }
}

pub struct Publisher {
    attempts: u32,
    delay: Duration,
}

impl Publisher {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.push_attempts, config.push_retry_delay())
    }

    pub async fn publish(
        &self,
        repo: &Path,
        branch: &str,
        base: &str,
        pusher: &dyn Pusher,
    ) -> Result<PublishOutcome> {
        let new_commits = count_new_commits(repo, branch, base).await?;
        self.push_commits(repo, branch, new_commits, pusher).await
    }

    /// Push when `new_commits > 0`, retrying with a fixed delay.
    pub async fn push_commits(
        &self,
        repo: &Path,
        branch: &str,
        new_commits: usize,
        pusher: &dyn Pusher,
    ) -> Result<PublishOutcome> {
        if new_commits == 0 {
            clog!("{} is up to date, nothing to push", branch);
            return Ok(PublishOutcome {
                success: true,
                new_commits: 0,
                attempts: 0,
            });
        }

        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            match pusher.push(repo, branch).await {
                Ok(()) => {
                    clog!(
                        "pushed {} commits to {} (attempt {}/{})",
                        new_commits,
                        branch,
                        attempt,
                        self.attempts
                    );
                    return Ok(PublishOutcome {
                        success: true,
                        new_commits,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    clog_warn!("push attempt {}/{} failed: {}", attempt, self.attempts, e);
                    last_error = e.to_string();
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        Err(Error::Publish {
            attempts: self.attempts,
            message: last_error,
        })
    }
}

pub fn render_publish_failure(branch: &str, err: &Error) -> String {
    let (attempts, detail) = match err {
        Error::Publish { attempts, message } => (Some(*attempts), message.clone()),
        other => (None, other.to_string()),
    };
    let mut body = format!(
        "{}\n## ❌ Publishing `{}` failed\n\n",
        marker(PUBLISH_FAILURE_MARKER_KIND),
        branch
    );
    match attempts {
        Some(n) => body.push_str(&format!("The push was attempted {} times without success.\n", n)),
        None => body.push_str("The branch could not be inspected before pushing.\n"),
    }
    body.push_str(&format!(
        "\n**Suggested fix:** check the remote and token, then re-run the job.\n\n```\n{}\n```\n",
        detail.trim_end()
    ));
    body
}

/// Post (or refresh) the publish failure comment on `task`.
pub async fn report_publish_failure(
    tracker: &dyn IssueTracker,
    task: TaskId,
    branch: &str,
    err: &Error,
) -> Result<u64> {
    let body = render_publish_failure(branch, err);
    let (id, created) =
        find_or_create_comment(tracker, task, &marker(PUBLISH_FAILURE_MARKER_KIND), &body).await?;
    if !created {
        tracker.update_comment(id, &body).await?;
    }
    clog!("reported publish failure of {} on {}", branch, task);
    Ok(id)
}

/// Walk the history off the runtime, giving up after [`GIT_SCAN_TIMEOUT`].
async fn count_new_commits(repo: &Path, branch: &str, base: &str) -> Result<usize> {
    let path = repo.to_path_buf();
    let (branch, base) = (branch.to_string(), base.to_string());
    let scan = spawn_blocking(move || GitOps::new(&path)?.commits_ahead(&branch, &base));
    match tokio::time::timeout(GIT_SCAN_TIMEOUT, scan).await {
        Ok(Ok(count)) => count,
        Ok(Err(join_err)) => Err(Error::TaskJoin(join_err.to_string())),
        Err(_) => Err(Error::Timeout(GIT_SCAN_TIMEOUT)),
    }
}

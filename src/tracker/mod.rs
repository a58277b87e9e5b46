//! Issue-tracker seam.
//!
//! The tracker is the only shared state between independent conductor
//! invocations. Labels, comments, open/closed flags and workflow-run records
//! are the coordination medium; there are no locks or transactions. Every
//! mutating call must be safe to repeat.

mod github;
mod memory;

pub use github::GitHubTracker;
pub use memory::{Dispatch, MemoryTracker};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{CloseReason, Task, TaskId};
use crate::error::Result;

/// Hidden marker identifying conductor-owned comments of a given kind.
pub fn marker(kind: &str) -> String {
    format!("<!-- conductor:{} -->", kind)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
}

/// A task to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Other,
}

impl RunStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" | "requested" | "waiting" | "pending" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Other,
        }
    }

    /// Whether the run has not finished yet.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }
}

/// One execution record of an automation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub workflow: String,
    /// Display title; dispatched runs carry the task number here.
    pub title: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub html_url: String,
}

impl WorkflowRun {
    /// Whether the title names `task` as a whole `#N` token.
    pub fn mentions_task(&self, task: TaskId) -> bool {
        let needle = task.to_string();
        self.title.match_indices(&needle).any(|(at, _)| {
            !self.title[at + needle.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        })
    }
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn get_task(&self, id: TaskId) -> Result<Task>;

    /// Open tasks, optionally restricted to those carrying `label`.
    async fn list_open_tasks(&self, label: Option<&str>) -> Result<Vec<Task>>;

    async fn create_task(&self, task: &NewTask) -> Result<TaskId>;

    async fn update_task_body(&self, id: TaskId, body: &str) -> Result<()>;

    async fn add_labels(&self, id: TaskId, labels: &[String]) -> Result<()>;

    /// Remove `label`; a label that is not present is not an error.
    async fn remove_label(&self, id: TaskId, label: &str) -> Result<()>;

    async fn list_comments(&self, id: TaskId) -> Result<Vec<Comment>>;

    async fn create_comment(&self, id: TaskId, body: &str) -> Result<u64>;

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<()>;

    async fn close_task(&self, id: TaskId, reason: CloseReason) -> Result<()>;

    async fn dispatch_workflow(
        &self,
        workflow: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Recent runs of `workflow`, newest first.
    async fn list_workflow_runs(&self, workflow: &str) -> Result<Vec<WorkflowRun>>;
}

/// Find the first comment containing `marker`, or create one with `body`.
/// Returns the comment id and whether it was created.
pub async fn find_or_create_comment(
    tracker: &dyn IssueTracker,
    id: TaskId,
    marker: &str,
    body: &str,
) -> Result<(u64, bool)> {
    let existing = tracker.list_comments(id).await?;
    if let Some(comment) = existing.iter().find(|c| c.body.contains(marker)) {
        return Ok((comment.id, false));
    }
    Ok((tracker.create_comment(id, body).await?, true))
}

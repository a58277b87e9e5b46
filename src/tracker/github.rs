//! GitHub REST implementation of [`IssueTracker`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use super::{Comment, IssueTracker, NewTask, RunStatus, WorkflowRun};
use crate::client::{HttpRequest, RetryingClient};
use crate::config::TrackerConfig;
use crate::core::{CloseReason, Task, TaskId, TaskState};
use crate::error::{Error, Result};
use crate::{clog_debug, clog_trace};

const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    body: Option<String>,
    #[serde(default)]
    labels: Vec<RawLabel>,
    state: String,
    state_reason: Option<String>,
    pull_request: Option<serde_json::Value>,
}

impl RawIssue {
    fn into_task(self) -> Task {
        let state = if self.state == "closed" {
            let reason = match self.state_reason.as_deref() {
                Some("completed") => Some(CloseReason::Completed),
                Some("not_planned") => Some(CloseReason::NotPlanned),
                _ => None,
            };
            TaskState::Closed { reason }
        } else {
            TaskState::Open
        };
        Task {
            id: TaskId(self.number),
            title: self.title,
            body: self.body.unwrap_or_default(),
            labels: self.labels.into_iter().map(|l| l.name).collect::<BTreeSet<_>>(),
            state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    id: u64,
    #[serde(default)]
    display_title: Option<String>,
    status: Option<String>,
    created_at: DateTime<Utc>,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct RawRuns {
    #[serde(default)]
    workflow_runs: Vec<RawRun>,
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    number: u64,
}

pub struct GitHubTracker {
    client: RetryingClient,
    api_base: String,
    owner: String,
    repo: String,
}

impl GitHubTracker {
    pub fn new(config: &TrackerConfig, client: RetryingClient) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn request(&self, req: HttpRequest) -> HttpRequest {
        req.header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get_pages<T: serde::de::DeserializeOwned + Send>(&self, base: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let sep = if base.contains('?') { '&' } else { '?' };
            let url = format!("{}{}per_page={}&page={}", base, sep, PAGE_SIZE, page);
            let response = self.client.call(&self.request(HttpRequest::get(url))).await?;
            let batch: Vec<T> = response.json()?;
            let done = batch.len() < PAGE_SIZE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

fn parse_issue(body: &str) -> Result<Task> {
    let raw: RawIssue = serde_json::from_str(body)?;
    Ok(raw.into_task())
}

fn parse_runs(workflow: &str, body: &str) -> Result<Vec<WorkflowRun>> {
    let raw: RawRuns = serde_json::from_str(body)?;
    Ok(raw
        .workflow_runs
        .into_iter()
        .map(|r| WorkflowRun {
            id: r.id,
            workflow: workflow.to_string(),
            title: r.display_title.unwrap_or_default(),
            status: RunStatus::parse(r.status.as_deref().unwrap_or_default()),
            created_at: r.created_at,
            html_url: r.html_url,
        })
        .collect())
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    async fn get_task(&self, id: TaskId) -> Result<Task> {
        let url = self.repo_url(&format!("issues/{}", id.0));
        let response = match self.client.call(&self.request(HttpRequest::get(url))).await {
            Err(Error::Api { status: 404, .. }) => return Err(Error::TaskNotFound(id.0)),
            other => other?,
        };
        clog_trace!("issue {} payload: {}", id, response.body);
        parse_issue(&response.body)
    }

    async fn list_open_tasks(&self, label: Option<&str>) -> Result<Vec<Task>> {
        let mut url = Url::parse(&self.repo_url("issues"))
            .map_err(|e| Error::Validation(format!("bad tracker url: {}", e)))?;
        url.query_pairs_mut().append_pair("state", "open");
        if let Some(label) = label {
            url.query_pairs_mut().append_pair("labels", label);
        }
        let raw: Vec<RawIssue> = self.get_pages(url.as_str()).await?;
        Ok(raw
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(RawIssue::into_task)
            .collect())
    }

    async fn create_task(&self, task: &NewTask) -> Result<TaskId> {
        let req = HttpRequest::post(self.repo_url("issues")).json(json!({
            "title": task.title,
            "body": task.body,
            "labels": task.labels,
        }));
        let created: Created = self.client.call(&self.request(req)).await?.json()?;
        clog_debug!("created issue #{}", created.number);
        Ok(TaskId(created.number))
    }

    async fn update_task_body(&self, id: TaskId, body: &str) -> Result<()> {
        let req = HttpRequest::patch(self.repo_url(&format!("issues/{}", id.0)))
            .json(json!({ "body": body }));
        self.client.call(&self.request(req)).await?;
        Ok(())
    }

    async fn add_labels(&self, id: TaskId, labels: &[String]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let req = HttpRequest::post(self.repo_url(&format!("issues/{}/labels", id.0)))
            .json(json!({ "labels": labels }));
        self.client.call(&self.request(req)).await?;
        Ok(())
    }

    async fn remove_label(&self, id: TaskId, label: &str) -> Result<()> {
        let mut url = Url::parse(&self.repo_url(&format!("issues/{}/labels", id.0)))
            .map_err(|e| Error::Validation(format!("bad tracker url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Validation("tracker url cannot be a base".to_string()))?
            .push(label);
        match self
            .client
            .call(&self.request(HttpRequest::delete(url.as_str())))
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Api { status: 404, .. }) => {
                clog_debug!("label '{}' not present on {}", label, id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_comments(&self, id: TaskId) -> Result<Vec<Comment>> {
        let raw: Vec<RawComment> = self
            .get_pages(&self.repo_url(&format!("issues/{}/comments", id.0)))
            .await?;
        Ok(raw
            .into_iter()
            .map(|c| Comment {
                id: c.id,
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_comment(&self, id: TaskId, body: &str) -> Result<u64> {
        let req = HttpRequest::post(self.repo_url(&format!("issues/{}/comments", id.0)))
            .json(json!({ "body": body }));
        let created: Created = self.client.call(&self.request(req)).await?.json()?;
        Ok(created.id)
    }

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        let req = HttpRequest::patch(self.repo_url(&format!("issues/comments/{}", comment_id)))
            .json(json!({ "body": body }));
        self.client.call(&self.request(req)).await?;
        Ok(())
    }

    async fn close_task(&self, id: TaskId, reason: CloseReason) -> Result<()> {
        let req = HttpRequest::patch(self.repo_url(&format!("issues/{}", id.0))).json(json!({
            "state": "closed",
            "state_reason": reason.as_str(),
        }));
        self.client.call(&self.request(req)).await?;
        Ok(())
    }

    async fn dispatch_workflow(
        &self,
        workflow: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<()> {
        let req = HttpRequest::post(
            self.repo_url(&format!("actions/workflows/{}/dispatches", workflow)),
        )
        .json(json!({ "ref": git_ref, "inputs": inputs }));
        self.client.call(&self.request(req)).await?;
        Ok(())
    }

    async fn list_workflow_runs(&self, workflow: &str) -> Result<Vec<WorkflowRun>> {
        let url = self.repo_url(&format!("actions/workflows/{}/runs?per_page=30", workflow));
        let response = self.client.call(&self.request(HttpRequest::get(url))).await?;
        parse_runs(workflow, &response.body)
    }
}

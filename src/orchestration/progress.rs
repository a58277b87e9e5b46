//! Progress comment rendering and find-or-create publishing.
//!
//! Each task has at most one progress comment, found by a hidden marker.
//! It is created on the first update and edited in place afterwards; it is
//! left on the task after the run finishes.

use std::sync::Arc;

use crate::core::TaskId;
use crate::error::Result;
use crate::tracker::{find_or_create_comment, marker, IssueTracker};
use crate::clog_debug;

pub const BAR_SEGMENTS: usize = 20;
pub const PROGRESS_MARKER_KIND: &str = "progress";

/// Named lifecycle stages with their default completion percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Started,
    Analyzing,
    Designing,
    Implementing,
    Testing,
    Publishing,
    Completed,
    Failed,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Started => "Started",
            Stage::Analyzing => "Analyzing",
            Stage::Designing => "Designing",
            Stage::Implementing => "Implementing",
            Stage::Testing => "Testing",
            Stage::Publishing => "Publishing",
            Stage::Completed => "Completed",
            Stage::Failed => "Failed",
        }
    }

    pub fn default_percent(&self) -> u8 {
        match self {
            Stage::Started => 5,
            Stage::Analyzing => 15,
            Stage::Designing => 30,
            Stage::Implementing => 55,
            Stage::Testing => 75,
            Stage::Publishing => 90,
            Stage::Completed => 100,
            Stage::Failed => 100,
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Stage::Completed => "✅",
            Stage::Failed => "❌",
            _ => "⏳",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "started" | "start" => Some(Stage::Started),
            "analyzing" | "analysis" => Some(Stage::Analyzing),
            "designing" | "design" => Some(Stage::Designing),
            "implementing" | "implementation" => Some(Stage::Implementing),
            "testing" | "test" => Some(Stage::Testing),
            "publishing" | "publish" => Some(Stage::Publishing),
            "completed" | "done" => Some(Stage::Completed),
            "failed" => Some(Stage::Failed),
            _ => None,
        }
    }
}

/// Content of one progress comment revision.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    pub status: String,
    pub percent: u8,
    pub details: String,
    pub pull_request: Option<String>,
    pub run_link: Option<String>,
}

impl ProgressUpdate {
    pub fn new(stage: Stage, status: &str) -> Self {
        Self {
            stage,
            status: status.to_string(),
            percent: stage.default_percent(),
            details: String::new(),
            pull_request: None,
            run_link: None,
        }
    }

    pub fn percent(mut self, percent: u8) -> Self {
        self.percent = percent.min(100);
        self
    }

    pub fn details(mut self, details: &str) -> Self {
        self.details = details.to_string();
        self
    }

    pub fn pull_request(mut self, pr: Option<String>) -> Self {
        self.pull_request = pr;
        self
    }

    pub fn run_link(mut self, link: Option<String>) -> Self {
        self.run_link = link;
        self
    }
}

/// `floor(pct / 5)` filled segments out of [`BAR_SEGMENTS`].
pub fn render_bar(percent: u8) -> String {
    let filled = (percent.min(100) / 5) as usize;
    format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(BAR_SEGMENTS - filled)
    )
}

pub fn render(update: &ProgressUpdate) -> String {
    let mut body = format!(
        "{}\n## {} {}\n\n**Status:** {}\n\n`{}` {}%\n",
        marker(PROGRESS_MARKER_KIND),
        update.stage.icon(),
        update.stage.name(),
        update.status,
        render_bar(update.percent),
        update.percent.min(100)
    );
    if !update.details.trim().is_empty() {
        body.push_str(&format!("\n{}\n", update.details.trim()));
    }
    if let Some(pr) = &update.pull_request {
        body.push_str(&format!("\n**Pull request:** {}\n", pr));
    }
    if let Some(link) = &update.run_link {
        body.push_str(&format!("\n**Run log:** {}\n", link));
    }
    body
}

/// Writes progress comments through the tracker.
pub struct ProgressReporter {
    tracker: Arc<dyn IssueTracker>,
}

impl ProgressReporter {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }

    /// Create or update the task's progress comment. Returns its id.
    pub async fn report(&self, task: TaskId, update: &ProgressUpdate) -> Result<u64> {
        let body = render(update);
        let (id, created) = find_or_create_comment(
            self.tracker.as_ref(),
            task,
            &marker(PROGRESS_MARKER_KIND),
            &body,
        )
        .await?;
        if !created {
            self.tracker.update_comment(id, &body).await?;
        }
        clog_debug!(
            "progress {} {} {}% (comment {}, created={})",
            task,
            update.stage.name(),
            update.percent,
            id,
            created
        );
        Ok(id)
    }
}

//! Run coordinator: the lifecycle of one automation run against one task.
//!
//! `idle -> processing -> {completed, failed}`. The processing label marks a
//! run believed active. The entry guard is a best-effort heuristic; two
//! invocations racing between the check and the label write can both start.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{CoordinatorConfig, LabelConfig};
use crate::core::{CloseReason, Task, TaskId};
use crate::error::Result;
use crate::orchestration::failure::{classify_failure, render_failure_comment, FailureKind};
use crate::orchestration::progress::{ProgressReporter, ProgressUpdate, Stage};
use crate::tracker::{marker, IssueTracker, WorkflowRun};
use crate::{clog, clog_warn};

/// Identity of the run being coordinated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub task: TaskId,
    pub workflow: String,
    /// Id of the current run, excluded from the duplicate check.
    pub run_id: Option<u64>,
    pub run_url: Option<String>,
}

impl RunContext {
    pub fn new(task: TaskId, workflow: &str) -> Self {
        Self {
            task,
            workflow: workflow.to_string(),
            run_id: None,
            run_url: None,
        }
    }

    pub fn with_run(mut self, run_id: Option<u64>, run_url: Option<String>) -> Self {
        self.run_id = run_id;
        self.run_url = run_url;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Another in-flight run for this task started inside the window.
    RecentRun { run_id: u64, started: DateTime<Utc> },
    ProcessingLabel,
    TaskClosed,
}

impl std::fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateReason::RecentRun { run_id, started } => write!(
                f,
                "run {} for this task is still in flight (started {})",
                run_id,
                started.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            DuplicateReason::ProcessingLabel => write!(f, "the task is already marked as processing"),
            DuplicateReason::TaskClosed => write!(f, "the task is already closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Proceed,
    Duplicate(DuplicateReason),
}

/// Decide whether a new run may start.
///
/// A run counts against the window when it belongs to `task`, has not
/// finished, started less than `window` before `now`, and is older than
/// `current_run` (creation time, then id). Of two runs for the same task only
/// the newer one backs off. When the current run is not in `runs`, every
/// other matching run counts.
pub fn check_duplicate(
    runs: &[WorkflowRun],
    current_run: Option<u64>,
    task: &Task,
    processing_label: &str,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> GuardVerdict {
    if task.is_closed() {
        return GuardVerdict::Duplicate(DuplicateReason::TaskClosed);
    }
    let current = current_run.and_then(|id| runs.iter().find(|r| r.id == id));
    let is_prior = |r: &WorkflowRun| match current {
        Some(cur) => (r.created_at, r.id) < (cur.created_at, cur.id),
        None => Some(r.id) != current_run,
    };
    let recent = runs.iter().find(|r| {
        is_prior(r)
            && r.status.is_active()
            && r.mentions_task(task.id)
            && now.signed_duration_since(r.created_at) < window
    });
    if let Some(run) = recent {
        return GuardVerdict::Duplicate(DuplicateReason::RecentRun {
            run_id: run.id,
            started: run.created_at,
        });
    }
    if task.has_label(processing_label) {
        return GuardVerdict::Duplicate(DuplicateReason::ProcessingLabel);
    }
    GuardVerdict::Proceed
}

pub struct Coordinator {
    tracker: Arc<dyn IssueTracker>,
    progress: ProgressReporter,
    labels: LabelConfig,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(tracker: Arc<dyn IssueTracker>, labels: LabelConfig, config: CoordinatorConfig) -> Self {
        Self {
            progress: ProgressReporter::new(tracker.clone()),
            tracker,
            labels,
            config,
        }
    }

    /// Run the entry guard and, if clear, claim the task.
    pub async fn start(&self, ctx: &RunContext) -> Result<GuardVerdict> {
        let task = self.tracker.get_task(ctx.task).await?;
        let runs = self.tracker.list_workflow_runs(&ctx.workflow).await?;
        let verdict = check_duplicate(
            &runs,
            ctx.run_id,
            &task,
            &self.labels.processing,
            Utc::now(),
            self.config.duplicate_window(),
        );

        if let GuardVerdict::Duplicate(reason) = &verdict {
            clog_warn!("duplicate run for {} aborted: {}", ctx.task, reason);
            if !matches!(reason, DuplicateReason::TaskClosed) {
                self.tracker
                    .create_comment(ctx.task, &render_duplicate_comment(ctx, reason))
                    .await?;
            }
            return Ok(verdict);
        }

        self.tracker
            .add_labels(ctx.task, std::slice::from_ref(&self.labels.processing))
            .await?;
        self.report(ctx, ProgressUpdate::new(Stage::Started, "Automation run started"))
            .await?;
        clog!("run started for {} ({})", ctx.task, ctx.workflow);
        Ok(verdict)
    }

    /// Write a progress update, defaulting the run link to this run.
    pub async fn report(&self, ctx: &RunContext, mut update: ProgressUpdate) -> Result<u64> {
        if update.run_link.is_none() {
            update.run_link = ctx.run_url.clone();
        }
        self.progress.report(ctx.task, &update).await
    }

    /// Finalise a successful run. Closing is what triggers downstream tasks.
    pub async fn complete(&self, ctx: &RunContext, pull_request: Option<String>) -> Result<()> {
        self.report(
            ctx,
            ProgressUpdate::new(Stage::Completed, "Run completed successfully")
                .pull_request(pull_request),
        )
        .await?;
        self.tracker
            .add_labels(ctx.task, std::slice::from_ref(&self.labels.completed))
            .await?;
        self.tracker
            .remove_label(ctx.task, &self.labels.processing)
            .await?;
        self.tracker
            .close_task(ctx.task, CloseReason::Completed)
            .await?;
        clog!("run completed for {}, task closed", ctx.task);
        Ok(())
    }

    /// Record a failed run. The task stays open.
    pub async fn fail(&self, ctx: &RunContext, output: &str) -> Result<FailureKind> {
        let kind = classify_failure(output);
        self.tracker
            .create_comment(
                ctx.task,
                &render_failure_comment(
                    kind,
                    output,
                    self.config.output_excerpt_chars,
                    ctx.run_url.as_deref(),
                ),
            )
            .await?;
        self.report(
            ctx,
            ProgressUpdate::new(Stage::Failed, kind.title()).details(kind.remediation()),
        )
        .await?;
        self.tracker
            .remove_label(ctx.task, &self.labels.processing)
            .await?;
        clog_warn!("run failed for {}: {}", ctx.task, kind);
        Ok(kind)
    }
}

fn render_duplicate_comment(ctx: &RunContext, reason: &DuplicateReason) -> String {
    let mut body = format!(
        "{}\n## ⏭️ Duplicate run skipped\n\nA new `{}` run was not started because {}.\n",
        marker("duplicate"),
        ctx.workflow,
        reason
    );
    if let Some(url) = &ctx.run_url {
        body.push_str(&format!("\n**Skipped run:** {}\n", url));
    }
    body
}

//! Dependency-graph resolver.
//!
//! Turns a "task closed" signal into automation runs for every task whose
//! prerequisites are now all closed. The graph is never stored: candidates
//! are listed and their declarations re-evaluated against live tracker state
//! on every invocation.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, CoordinatorConfig, LabelConfig};
use crate::core::{evaluate, CloseReason, DependencyParser, Readiness, Task, TaskId, Tier};
use crate::error::Result;
use crate::tracker::{find_or_create_comment, marker, IssueTracker, WorkflowRun};
use crate::{clog, clog_debug, clog_warn};

pub const TRIGGER_MARKER_KIND: &str = "trigger";
pub const BATCH_COMPLETE_MARKER_KIND: &str = "batch-complete";

/// Runs created this long before the dispatch call still count as ours
/// when nothing newer is found.
const CLOCK_SKEW_SECS: i64 = 30;

/// The run a dispatch for `task` most likely created: the newest one started
/// at or after `dispatched_at`, else the newest inside the clock-skew window.
fn pick_dispatched_run(
    runs: Vec<WorkflowRun>,
    task: TaskId,
    dispatched_at: DateTime<Utc>,
) -> Option<WorkflowRun> {
    let since = dispatched_at - chrono::Duration::seconds(CLOCK_SKEW_SECS);
    let mut ours: Vec<WorkflowRun> = runs
        .into_iter()
        .filter(|r| r.created_at >= since && r.mentions_task(task))
        .collect();
    ours.sort_by_key(|r| std::cmp::Reverse((r.created_at >= dispatched_at, r.created_at, r.id)));
    ours.into_iter().next()
}

/// A dispatched automation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub task: TaskId,
    pub workflow: String,
    pub tier: Tier,
    /// Direct run link, or the dashboard when the run was not found in time.
    pub link: String,
    pub direct_link: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Processing,
    Completed,
    Closed,
    SkipTier,
}

/// Result of one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub triggered: Vec<Trigger>,
    pub blocked: Vec<(TaskId, Vec<TaskId>)>,
    pub skipped: Vec<(TaskId, SkipReason)>,
    pub failed: Vec<(TaskId, String)>,
    pub parent_closed: Option<TaskId>,
}

impl ResolveReport {
    pub fn triggered_tasks(&self) -> Vec<TaskId> {
        self.triggered.iter().map(|t| t.task).collect()
    }
}

pub struct Resolver {
    tracker: Arc<dyn IssueTracker>,
    parser: DependencyParser,
    labels: LabelConfig,
    coordinator: CoordinatorConfig,
    trunk: String,
    dashboard: String,
}

impl Resolver {
    pub fn new(tracker: Arc<dyn IssueTracker>, parser: DependencyParser, config: &Config) -> Self {
        Self {
            tracker,
            parser,
            labels: config.labels.clone(),
            coordinator: config.coordinator.clone(),
            trunk: config.tracker.trunk_branch.clone(),
            dashboard: config.tracker.dashboard(),
        }
    }

    /// Handle the "task closed" signal for `closed`.
    ///
    /// Candidates are the open siblings of the same decomposition batch when
    /// `closed` declares a parent, otherwise every open task whose
    /// declaration references `closed`. When the last open sibling of a batch
    /// closes, the parent is closed too.
    pub async fn on_task_closed(&self, closed: TaskId) -> Result<ResolveReport> {
        let task = self.tracker.get_task(closed).await?;
        if !task.is_closed() {
            clog_warn!("{} reported closed but tracker says {}", closed, task.state);
        }

        let parent = self.parser.parse_parent(&task.body);
        let candidates = match parent {
            Some(parent) => self.batch_children(parent).await?,
            None => self
                .tracker
                .list_open_tasks(None)
                .await?
                .into_iter()
                .filter(|t| self.parser.references(&t.body, closed))
                .collect(),
        };
        clog!(
            "{} closed: {} candidates{}",
            closed,
            candidates.len(),
            parent.map(|p| format!(" in batch {}", p)).unwrap_or_default()
        );

        let mut report = self.dispatch_ready(candidates).await;
        if let Some(parent) = parent {
            report.parent_closed = self.close_finished_parent(parent).await?;
        }
        Ok(report)
    }

    /// First trigger pass over a freshly decomposed batch.
    pub async fn resolve_batch(&self, parent: TaskId) -> Result<ResolveReport> {
        let candidates = self.batch_children(parent).await?;
        clog!("batch {}: {} open children", parent, candidates.len());
        Ok(self.dispatch_ready(candidates).await)
    }

    /// Evaluate and, if ready, trigger a single task.
    pub async fn resolve_task(&self, id: TaskId) -> Result<ResolveReport> {
        let task = self.tracker.get_task(id).await?;
        Ok(self.dispatch_ready(vec![task]).await)
    }

    async fn batch_children(&self, parent: TaskId) -> Result<Vec<Task>> {
        Ok(self
            .tracker
            .list_open_tasks(Some(&self.labels.subtask))
            .await?
            .into_iter()
            .filter(|t| self.parser.parse_parent(&t.body) == Some(parent))
            .collect())
    }

    fn skip_reason(&self, task: &Task) -> Option<SkipReason> {
        if task.is_closed() {
            Some(SkipReason::Closed)
        } else if task.has_label(&self.labels.processing) {
            Some(SkipReason::Processing)
        } else if task.has_label(&self.labels.completed) {
            Some(SkipReason::Completed)
        } else if task.tier(&self.labels) == Some(Tier::Skip) {
            Some(SkipReason::SkipTier)
        } else {
            None
        }
    }

    /// Read every prerequisite once, decide readiness from that snapshot,
    /// then dispatch all ready candidates concurrently.
    async fn dispatch_ready(&self, candidates: Vec<Task>) -> ResolveReport {
        let mut report = ResolveReport::default();

        let mut pending: Vec<(Task, Vec<TaskId>)> = Vec::new();
        for task in candidates {
            match self.skip_reason(&task) {
                Some(reason) => {
                    clog_debug!("skipping {}: {:?}", task.id, reason);
                    report.skipped.push((task.id, reason));
                }
                None => {
                    let deps = self.parser.parse(&task.body);
                    pending.push((task, deps));
                }
            }
        }

        let snapshot = self.snapshot(&pending).await;
        let mut ready = Vec::new();
        for (task, deps) in pending {
            match evaluate(&deps, |d| snapshot.get(&d).copied()) {
                Readiness::Ready => ready.push((task, deps)),
                Readiness::Blocked { waiting_on } => {
                    clog_debug!("{} blocked on {:?}", task.id, waiting_on);
                    report.blocked.push((task.id, waiting_on));
                }
            }
        }

        let dispatched_at = Utc::now();
        let results = join_all(
            ready
                .iter()
                .map(|(task, deps)| self.trigger(task, deps, dispatched_at)),
        )
        .await;
        for ((task, _), result) in ready.iter().zip(results) {
            match result {
                Ok(trigger) => report.triggered.push(trigger),
                Err(e) => {
                    clog_warn!("failed to trigger {}: {}", task.id, e);
                    report.failed.push((task.id, e.to_string()));
                }
            }
        }

        clog!(
            "resolver pass: {} triggered, {} blocked, {} skipped, {} failed",
            report.triggered.len(),
            report.blocked.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Closed-state of every referenced prerequisite. Lookups that fail are
    /// left out, which the readiness check treats as not closed.
    async fn snapshot(&self, pending: &[(Task, Vec<TaskId>)]) -> HashMap<TaskId, bool> {
        let open: HashMap<TaskId, bool> = pending.iter().map(|(t, _)| (t.id, false)).collect();
        let wanted: BTreeSet<TaskId> = pending
            .iter()
            .flat_map(|(_, deps)| deps.iter().copied())
            .filter(|d| !open.contains_key(d))
            .collect();

        let lookups = join_all(wanted.iter().map(|&id| self.tracker.get_task(id))).await;
        let mut snapshot = open;
        for (id, result) in wanted.into_iter().zip(lookups) {
            match result {
                Ok(task) => {
                    snapshot.insert(id, task.is_closed());
                }
                Err(e) => clog_warn!("could not read prerequisite {}: {}", id, e),
            }
        }
        snapshot
    }

    fn workflow_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Trivial => &self.coordinator.trivial_workflow,
            _ => &self.coordinator.medium_workflow,
        }
    }

    async fn trigger(
        &self,
        task: &Task,
        deps: &[TaskId],
        dispatched_at: DateTime<Utc>,
    ) -> Result<Trigger> {
        let tier = task.tier(&self.labels).unwrap_or(Tier::Medium);
        let workflow = self.workflow_for(tier).to_string();
        let inputs: BTreeMap<String, String> = [
            ("issue_number".to_string(), task.id.0.to_string()),
            ("complexity".to_string(), tier.as_str().to_string()),
        ]
        .into_iter()
        .collect();

        self.tracker
            .dispatch_workflow(&workflow, &self.trunk, &inputs)
            .await?;
        clog!("dispatched {} for {} ({})", workflow, task.id, tier);

        let found = self
            .find_run_link(&workflow, task.id, dispatched_at, self.coordinator.link_poll_delay())
            .await;
        let direct_link = found.is_some();
        let link = found.unwrap_or_else(|| self.dashboard.clone());

        self.tracker
            .create_comment(task.id, &render_trigger_comment(&workflow, tier, deps, &link))
            .await?;

        Ok(Trigger {
            task: task.id,
            workflow,
            tier,
            link,
            direct_link,
        })
    }

    /// Wait `delay` once, then look for the run the dispatch created.
    async fn find_run_link(
        &self,
        workflow: &str,
        task: TaskId,
        dispatched_at: DateTime<Utc>,
        delay: Duration,
    ) -> Option<String> {
        tokio::time::sleep(delay).await;
        match self.tracker.list_workflow_runs(workflow).await {
            Ok(runs) => pick_dispatched_run(runs, task, dispatched_at).map(|r| r.html_url),
            Err(e) => {
                clog_debug!("run lookup for {} failed: {}", task, e);
                None
            }
        }
    }

    /// Close `parent` once none of its children remain open.
    async fn close_finished_parent(&self, parent: TaskId) -> Result<Option<TaskId>> {
        let parent_task = self.tracker.get_task(parent).await?;
        if parent_task.is_closed() || !self.batch_children(parent).await?.is_empty() {
            return Ok(None);
        }

        let body = format!(
            "{}\n## ✅ All subtasks complete\n\nEvery subtask of this task is closed. Closing {}.\n",
            marker(BATCH_COMPLETE_MARKER_KIND),
            parent
        );
        find_or_create_comment(
            self.tracker.as_ref(),
            parent,
            &marker(BATCH_COMPLETE_MARKER_KIND),
            &body,
        )
        .await?;
        self.tracker
            .add_labels(parent, std::slice::from_ref(&self.labels.completed))
            .await?;
        self.tracker.close_task(parent, CloseReason::Completed).await?;
        clog!("all subtasks of {} closed, parent closed", parent);
        Ok(Some(parent))
    }
}

fn render_trigger_comment(workflow: &str, tier: Tier, deps: &[TaskId], link: &str) -> String {
    let prerequisites = if deps.is_empty() {
        "This task has no prerequisites.".to_string()
    } else {
        format!(
            "All prerequisites are closed: {}.",
            deps.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        )
    };
    let route = match tier {
        Tier::Trivial => "direct implementation",
        _ => "design, then implementation",
    };
    format!(
        "{}\n## 🚀 Automation triggered\n\n{}\n\nStarted `{}` ({} route).\n\n**Run:** {}\n",
        marker(TRIGGER_MARKER_KIND),
        prerequisites,
        workflow,
        route,
        link
    )
}

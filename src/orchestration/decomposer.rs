//! Task decomposer.
//!
//! Splits a complex task into dependency-ordered subtasks. The model returns
//! sibling dependencies as zero-based indices; they are validated through
//! [`SubtaskGraph`] and then rewritten into dependency declarations that name
//! the real task numbers of the created siblings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{LabelConfig, ModelConfig};
use crate::core::{DependencyParser, SubtaskGraph, Task, TaskId, Tier};
use crate::error::{Error, Result};
use crate::model::{extract_json_object, ModelClient, ModelRequest};
use crate::tracker::{find_or_create_comment, marker, IssueTracker, NewTask};
use crate::{clog, clog_debug, clog_warn};

pub const MIN_SUBTASKS: usize = 1;
pub const MAX_SUBTASKS: usize = 8;
pub const DECOMPOSITION_MARKER_KIND: &str = "decomposition";

const TRIVIAL_MAX_HOURS: f64 = 2.0;
const DEFAULT_HOURS: f64 = 4.0;
const DEFAULT_PRIORITY: u8 = 3;
const DEFAULT_CATEGORY: &str = "general";
const MAX_BODY_CHARS: usize = 8000;

/// Hidden payloads: the plan on a pending summary, the plan index on a child.
const PLAN_PREFIX: &str = "<!-- conductor:plan ";
const INDEX_PREFIX: &str = "<!-- conductor:subtask-index ";
const PAYLOAD_END: &str = " -->";

const SYSTEM_PROMPT: &str = "You are a staff engineer planning work for autonomous coding \
agents. Reply with a single JSON object and nothing else.";

const PROMPT_TEMPLATE: &str = r#"Split the following task into 3 to 8 subtasks that can each be implemented and reviewed on their own.

Order the subtasks by layer: data/storage work first, then service/business logic, then presentation/UI.
Use "depends_on" to list the zero-based indices of earlier subtasks that must be finished first.
Subtasks with no dependencies will start immediately and in parallel.

Respond with JSON of exactly this shape:
{"tasks": [{"title": "<short imperative title>", "description": "<what to change and where>", "category": "<data|service|presentation|infra|docs>", "priority": <1-5>, "depends_on": [<index>, ...], "estimated_hours": <number>, "acceptance_criteria": ["<criterion>", ...]}], "architecture_notes": "<overall approach>"}

Task title: {title}

Task body:
{body}
"#;

/// One normalised subtask proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: u8,
    pub depends_on: Vec<i64>,
    pub estimated_hours: f64,
    pub acceptance_criteria: Vec<String>,
}

impl Subtask {
    /// Children are routed by size alone: small ones skip the design phase.
    pub fn tier(&self) -> Tier {
        if self.estimated_hours <= TRIVIAL_MAX_HOURS {
            Tier::Trivial
        } else {
            Tier::Medium
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub tasks: Vec<Subtask>,
    pub architecture_notes: String,
}

/// Subtasks created for one parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub parent: TaskId,
    pub children: Vec<TaskId>,
    /// Children created without prerequisites.
    pub roots: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecomposeOutcome {
    Created(Batch),
    /// The parent already carries a decomposition summary.
    AlreadyDecomposed,
    /// The model output was unusable; the parent was flagged for review.
    Fallback { reason: String },
}

pub fn build_prompt(title: &str, body: &str) -> String {
    let body: String = body.chars().take(MAX_BODY_CHARS).collect();
    PROMPT_TEMPLATE
        .replace("{title}", title.trim())
        .replace("{body}", body.trim())
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn parse_subtask(value: &Value) -> Option<Subtask> {
    let title = str_field(value, "title");
    if title.is_empty() {
        return None;
    }
    let category = match str_field(value, "category").to_lowercase() {
        c if c.is_empty() => DEFAULT_CATEGORY.to_string(),
        c => c.replace(char::is_whitespace, "-"),
    };
    let priority = value
        .get("priority")
        .and_then(Value::as_f64)
        .map(|p| p.round().clamp(1.0, 5.0) as u8)
        .unwrap_or(DEFAULT_PRIORITY);
    let depends_on = value
        .get("depends_on")
        .and_then(Value::as_array)
        .map(|deps| deps.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    let estimated_hours = value
        .get("estimated_hours")
        .and_then(Value::as_f64)
        .filter(|h| h.is_finite() && *h > 0.0)
        .unwrap_or(DEFAULT_HOURS);
    let acceptance_criteria = value
        .get("acceptance_criteria")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Some(Subtask {
        title,
        description: str_field(value, "description"),
        category,
        priority,
        depends_on,
        estimated_hours,
        acceptance_criteria,
    })
}

/// Validate and normalise a raw model response.
pub fn parse_decomposition(raw: &str) -> Result<Decomposition> {
    let value = extract_json_object(raw)
        .ok_or_else(|| Error::Decomposition("response contains no JSON object".to_string()))?;
    let entries = value
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Decomposition("response has no task list".to_string()))?;

    let mut tasks: Vec<Subtask> = entries.iter().filter_map(parse_subtask).collect();
    if tasks.len() < MIN_SUBTASKS {
        return Err(Error::Decomposition("no usable subtasks".to_string()));
    }
    if tasks.len() > MAX_SUBTASKS {
        clog_warn!("model proposed {} subtasks, keeping the first {}", tasks.len(), MAX_SUBTASKS);
        tasks.truncate(MAX_SUBTASKS);
    }

    Ok(Decomposition {
        tasks,
        architecture_notes: str_field(&value, "architecture_notes"),
    })
}

/// Body of a child task. `deps` are the already-resolved prerequisites.
pub fn render_child_body(
    parser: &DependencyParser,
    subtask: &Subtask,
    parent: TaskId,
    deps: &[TaskId],
) -> String {
    let mut body = String::new();
    if !subtask.description.is_empty() {
        body.push_str(&subtask.description);
        body.push_str("\n\n");
    }
    body.push_str(&format!(
        "**Category:** {} | **Priority:** P{} | **Estimate:** {}h\n",
        subtask.category, subtask.priority, subtask.estimated_hours
    ));
    if !subtask.acceptance_criteria.is_empty() {
        body.push_str("\n### Acceptance criteria\n\n");
        for criterion in &subtask.acceptance_criteria {
            body.push_str(&format!("- [ ] {}\n", criterion));
        }
    }
    body.push_str(&format!(
        "\n---\n{}\n{}\n",
        parser.render_parent(parent),
        parser.render(deps)
    ));
    body
}

fn payload<'a>(body: &'a str, prefix: &str) -> Option<&'a str> {
    let start = body.find(prefix)? + prefix.len();
    let len = body[start..].find(PAYLOAD_END)?;
    Some(&body[start..start + len])
}

/// Summary posted before any child exists. It carries the plan so an
/// interrupted run can finish the same batch instead of asking again.
fn render_pending(decomposition: &Decomposition) -> Result<String> {
    // `-->` would end the HTML comment early; JSON allows escaping the `>`.
    let plan = serde_json::to_string(decomposition)?.replace("-->", "--\\u003e");
    Ok(format!(
        "{}\n{}{}{}\n## 🧩 Decomposing into {} subtasks\n\nCreating the subtasks. This comment is replaced once they all exist.\n",
        marker(DECOMPOSITION_MARKER_KIND),
        PLAN_PREFIX,
        plan,
        PAYLOAD_END,
        decomposition.tasks.len()
    ))
}

fn render_summary(decomposition: &Decomposition, children: &[TaskId], deps: &[Vec<TaskId>]) -> String {
    let mut body = format!(
        "{}\n## 🧩 Task decomposed into {} subtasks\n",
        marker(DECOMPOSITION_MARKER_KIND),
        children.len()
    );
    if !decomposition.architecture_notes.is_empty() {
        body.push_str(&format!(
            "\n**Architecture notes:** {}\n",
            decomposition.architecture_notes
        ));
    }
    body.push_str("\n| Task | Title | Category | Priority | Estimate | Depends on |\n");
    body.push_str("|------|-------|----------|----------|----------|------------|\n");
    for ((subtask, id), deps) in decomposition.tasks.iter().zip(children).zip(deps) {
        let deps = if deps.is_empty() {
            "-".to_string()
        } else {
            deps.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        };
        body.push_str(&format!(
            "| {} | {} | {} | P{} | {}h | {} |\n",
            id,
            subtask.title.replace('|', "\\|"),
            subtask.category,
            subtask.priority,
            subtask.estimated_hours,
            deps
        ));
    }
    body.push_str(
        "\nSubtasks without dependencies start now; the rest start as soon as their prerequisites close.\n",
    );
    body
}

pub struct Decomposer {
    tracker: Arc<dyn IssueTracker>,
    model: Arc<dyn ModelClient>,
    parser: DependencyParser,
    labels: LabelConfig,
    temperature: f32,
}

impl Decomposer {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        model: Arc<dyn ModelClient>,
        parser: DependencyParser,
        labels: LabelConfig,
        model_config: &ModelConfig,
    ) -> Self {
        Self {
            tracker,
            model,
            parser,
            labels,
            temperature: model_config.temperature,
        }
    }

    async fn propose(&self, task: &Task) -> Result<Decomposition> {
        let request = ModelRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: build_prompt(&task.title, &task.body),
            temperature: self.temperature,
            json: true,
        };
        let raw = self.model.complete(&request).await?;
        parse_decomposition(&raw)
    }

    fn child_labels(&self, subtask: &Subtask) -> Vec<String> {
        vec![
            self.labels.subtask.clone(),
            subtask.tier().label(&self.labels).to_string(),
            format!("{}{}", self.labels.area_prefix, subtask.category),
        ]
    }

    pub async fn run(&self, parent: TaskId) -> Result<DecomposeOutcome> {
        let task = self.tracker.get_task(parent).await?;
        let summary_marker = marker(DECOMPOSITION_MARKER_KIND);
        let comments = self.tracker.list_comments(parent).await?;
        if let Some(summary) = comments.iter().find(|c| c.body.contains(&summary_marker)) {
            let Some(plan) = payload(&summary.body, PLAN_PREFIX) else {
                clog!("{} already decomposed, skipping", parent);
                return Ok(DecomposeOutcome::AlreadyDecomposed);
            };
            let decomposition: Decomposition = serde_json::from_str(plan)?;
            clog!("resuming interrupted decomposition of {}", parent);
            let batch = self.materialize(parent, &decomposition).await?;
            return Ok(DecomposeOutcome::Created(batch));
        }

        let decomposition = match self.propose(&task).await {
            Ok(d) => d,
            Err(e) => {
                clog_warn!("decomposition of {} failed: {}", parent, e);
                self.flag_for_review(parent, &e).await?;
                return Ok(DecomposeOutcome::Fallback {
                    reason: e.to_string(),
                });
            }
        };

        let batch = self.materialize(parent, &decomposition).await?;
        clog!(
            "decomposed {} into {} subtasks ({} ready)",
            parent,
            batch.children.len(),
            batch.roots.len()
        );
        Ok(DecomposeOutcome::Created(batch))
    }

    fn child_body(&self, subtask: &Subtask, parent: TaskId, index: usize, deps: &[TaskId]) -> String {
        format!(
            "{}{}{}{}\n",
            render_child_body(&self.parser, subtask, parent, deps),
            INDEX_PREFIX,
            index,
            PAYLOAD_END
        )
    }

    /// Open children of `parent` already created from its plan, by plan index.
    async fn existing_children(&self, parent: TaskId) -> Result<HashMap<usize, TaskId>> {
        Ok(self
            .tracker
            .list_open_tasks(Some(self.labels.subtask.as_str()))
            .await?
            .into_iter()
            .filter(|t| self.parser.parse_parent(&t.body) == Some(parent))
            .filter_map(|t| {
                payload(&t.body, INDEX_PREFIX)
                    .and_then(|i| i.parse::<usize>().ok())
                    .map(|i| (i, t.id))
            })
            .collect())
    }

    /// Create the children in two passes. Roots get their final body on
    /// creation; the others are created waiting on the still-open parent and
    /// patched once every sibling number is known.
    ///
    /// The plan is recorded on the parent first and children found from an
    /// earlier attempt are reused, so a rerun after a partial failure
    /// completes the same batch.
    pub async fn materialize(&self, parent: TaskId, decomposition: &Decomposition) -> Result<Batch> {
        let graph = SubtaskGraph::build(
            &decomposition
                .tasks
                .iter()
                .map(|t| t.depends_on.clone())
                .collect::<Vec<_>>(),
        );
        for edge in graph.dropped() {
            clog_warn!(
                "subtask {} of {}: dropped dependency on {} ({})",
                edge.task,
                parent,
                edge.depends_on,
                edge.reason
            );
        }

        let (summary_id, _) = find_or_create_comment(
            self.tracker.as_ref(),
            parent,
            &marker(DECOMPOSITION_MARKER_KIND),
            &render_pending(decomposition)?,
        )
        .await?;
        let existing = self.existing_children(parent).await?;

        let mut children = Vec::with_capacity(decomposition.tasks.len());
        for (i, subtask) in decomposition.tasks.iter().enumerate() {
            if let Some(&id) = existing.get(&i) {
                clog_debug!("reusing subtask {} for {}", id, parent);
                children.push(id);
                continue;
            }
            let placeholder: &[TaskId] = if graph.dependencies(i).is_empty() {
                &[]
            } else {
                std::slice::from_ref(&parent)
            };
            let id = self
                .tracker
                .create_task(&NewTask {
                    title: subtask.title.clone(),
                    body: self.child_body(subtask, parent, i, placeholder),
                    labels: self.child_labels(subtask),
                })
                .await?;
            clog_debug!("created subtask {} for {}", id, parent);
            children.push(id);
        }

        let mut resolved: Vec<Vec<TaskId>> = Vec::with_capacity(children.len());
        for (i, subtask) in decomposition.tasks.iter().enumerate() {
            let deps: Vec<TaskId> = graph.dependencies(i).into_iter().map(|d| children[d]).collect();
            if !deps.is_empty() {
                let body = self.child_body(subtask, parent, i, &deps);
                self.tracker.update_task_body(children[i], &body).await?;
            }
            resolved.push(deps);
        }

        let roots = graph.roots().into_iter().map(|i| children[i]).collect();
        self.tracker
            .update_comment(summary_id, &render_summary(decomposition, &children, &resolved))
            .await?;

        Ok(Batch {
            parent,
            children,
            roots,
        })
    }

    async fn flag_for_review(&self, parent: TaskId, error: &Error) -> Result<()> {
        self.tracker
            .add_labels(parent, std::slice::from_ref(&self.labels.needs_review))
            .await?;
        self.tracker
            .create_comment(
                parent,
                &format!(
                    "## ⚠️ Automatic decomposition failed\n\n{}\n\nPlease split this task manually \
                     or re-run the decomposition.",
                    error
                ),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DependencyConfig;
    use crate::model::ScriptedModel;
    use crate::tracker::MemoryTracker;

    fn parser() -> DependencyParser {
        DependencyParser::new(&DependencyConfig::default()).unwrap()
    }

    fn decomposer(tracker: Arc<MemoryTracker>, model: ScriptedModel) -> Decomposer {
        Decomposer::new(
            tracker,
            Arc::new(model),
            parser(),
            LabelConfig::default(),
            &ModelConfig::default(),
        )
    }

    const THREE_LAYERS: &str = r#"{
        "tasks": [
            {"title": "Add notes table", "description": "Migration for notes.", "category": "data",
             "priority": 1, "depends_on": [], "estimated_hours": 2,
             "acceptance_criteria": ["migration applies", "rollback works"]},
            {"title": "Notes service", "description": "CRUD service.", "category": "service",
             "priority": 2, "depends_on": [0], "estimated_hours": 4, "acceptance_criteria": []},
            {"title": "Notes page", "description": "UI.", "category": "presentation",
             "priority": 3, "depends_on": [1, 0], "estimated_hours": 3, "acceptance_criteria": []}
        ],
        "architecture_notes": "Layered."
    }"#;

    #[test]
    fn test_parse_normalises_fields() {
        let d = parse_decomposition(
            r#"{"tasks": [
                {"title": "  A  ", "priority": 9, "category": "Data Layer"},
                {"title": "", "description": "untitled entries are dropped"},
                {"title": "B", "priority": 0, "depends_on": [0, "x"], "estimated_hours": -1}
            ]}"#,
        )
        .unwrap();
        assert_eq!(d.tasks.len(), 2);
        assert_eq!(d.tasks[0].title, "A");
        assert_eq!(d.tasks[0].priority, 5);
        assert_eq!(d.tasks[0].category, "data-layer");
        assert_eq!(d.tasks[1].priority, 1);
        assert_eq!(d.tasks[1].depends_on, vec![0]);
        assert_eq!(d.tasks[1].estimated_hours, DEFAULT_HOURS);
        assert_eq!(d.architecture_notes, "");
    }

    #[test]
    fn test_parse_truncates_to_max() {
        let tasks: Vec<String> = (0..12).map(|i| format!(r#"{{"title": "t{}"}}"#, i)).collect();
        let d = parse_decomposition(&format!(r#"{{"tasks": [{}]}}"#, tasks.join(","))).unwrap();
        assert_eq!(d.tasks.len(), MAX_SUBTASKS);
    }

    #[test]
    fn test_parse_rejects_empty_or_missing() {
        assert!(parse_decomposition(r#"{"tasks": []}"#).is_err());
        assert!(parse_decomposition(r#"{"architecture_notes": "x"}"#).is_err());
        assert!(parse_decomposition("no json").is_err());
    }

    #[test]
    fn test_child_tier_by_hours() {
        let d = parse_decomposition(THREE_LAYERS).unwrap();
        assert_eq!(d.tasks[0].tier(), Tier::Trivial);
        assert_eq!(d.tasks[1].tier(), Tier::Medium);
    }

    #[test]
    fn test_child_body_round_trips_declarations() {
        let p = parser();
        let d = parse_decomposition(THREE_LAYERS).unwrap();
        let body = render_child_body(&p, &d.tasks[0], TaskId(50), &[TaskId(51), TaskId(52)]);
        assert!(body.contains("- [ ] migration applies"));
        assert!(body.contains("**Priority:** P1"));
        assert_eq!(p.parse(&body), vec![TaskId(51), TaskId(52)]);
        assert_eq!(p.parse_parent(&body), Some(TaskId(50)));

        let root = render_child_body(&p, &d.tasks[0], TaskId(50), &[]);
        assert!(p.parse(&root).is_empty());
    }

    #[tokio::test]
    async fn test_run_creates_children_with_real_ids() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.insert(Task::new(100, "Notes feature", "Add notes end to end"));
        let outcome = decomposer(tracker.clone(), ScriptedModel::new().respond(THREE_LAYERS))
            .run(TaskId(100))
            .await
            .unwrap();

        let DecomposeOutcome::Created(batch) = outcome else {
            panic!("expected a batch");
        };
        assert_eq!(batch.children, vec![TaskId(101), TaskId(102), TaskId(103)]);
        assert_eq!(batch.roots, vec![TaskId(101)]);

        let p = parser();
        let service = tracker.task(TaskId(102)).unwrap();
        assert_eq!(p.parse(&service.body), vec![TaskId(101)]);
        assert!(service.has_label("subtask"));
        assert!(service.has_label("complexity:medium"));
        assert!(service.has_label("area:service"));
        let page = tracker.task(TaskId(103)).unwrap();
        assert_eq!(p.parse(&page.body), vec![TaskId(101), TaskId(102)]);
        let table = tracker.task(TaskId(101)).unwrap();
        assert!(table.has_label("complexity:trivial"));
        assert!(p.parse(&table.body).is_empty());

        let summary = &tracker.comments(TaskId(100))[0];
        assert!(summary.contains("3 subtasks"));
        assert!(summary.contains("Layered."));
        assert!(summary.contains("| #103 |"));
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.insert(Task::new(1, "Big", ""));
        let d = decomposer(
            tracker.clone(),
            ScriptedModel::new().respond(THREE_LAYERS).respond(THREE_LAYERS),
        );
        d.run(TaskId(1)).await.unwrap();
        assert_eq!(d.run(TaskId(1)).await.unwrap(), DecomposeOutcome::AlreadyDecomposed);
        assert_eq!(tracker.tasks().len(), 4);
    }

    #[tokio::test]
    async fn test_interrupted_creation_resumes_same_batch() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.insert(Task::new(100, "Notes feature", "Add notes end to end"));
        tracker.fail_nth_create(3);
        // One model response only: the rerun must reuse the recorded plan.
        let d = decomposer(tracker.clone(), ScriptedModel::new().respond(THREE_LAYERS));

        assert!(d.run(TaskId(100)).await.is_err());
        assert_eq!(tracker.tasks().len(), 3);

        let DecomposeOutcome::Created(batch) = d.run(TaskId(100)).await.unwrap() else {
            panic!("expected the interrupted batch to be completed");
        };
        assert_eq!(batch.children, vec![TaskId(101), TaskId(102), TaskId(103)]);
        assert_eq!(tracker.tasks().len(), 4);

        let p = parser();
        assert_eq!(p.parse(&tracker.task(TaskId(102)).unwrap().body), vec![TaskId(101)]);
        assert_eq!(
            p.parse(&tracker.task(TaskId(103)).unwrap().body),
            vec![TaskId(101), TaskId(102)]
        );
        assert!(batch
            .children
            .iter()
            .all(|c| !p.references(&tracker.task(*c).unwrap().body, TaskId(100))));

        let comments = tracker.comments(TaskId(100));
        assert_eq!(comments.len(), 1);
        assert!(comments[0].contains("| #103 |"));
        assert!(!comments[0].contains(PLAN_PREFIX));
        assert_eq!(d.run(TaskId(100)).await.unwrap(), DecomposeOutcome::AlreadyDecomposed);
    }

    #[test]
    fn test_pending_summary_keeps_plan_intact() {
        let mut d = parse_decomposition(THREE_LAYERS).unwrap();
        d.tasks[0].title = "migrate a --> b".to_string();
        let body = render_pending(&d).unwrap();
        let plan = payload(&body, PLAN_PREFIX).unwrap();
        let back: Decomposition = serde_json::from_str(plan).unwrap();
        assert_eq!(back, d);
    }

    #[tokio::test]
    async fn test_cyclic_output_still_produces_a_root() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.insert(Task::new(1, "Big", ""));
        let model = ScriptedModel::new().respond(
            r#"{"tasks": [
                {"title": "a", "depends_on": [1]},
                {"title": "b", "depends_on": [0]},
                {"title": "c", "depends_on": [2, 7]}
            ]}"#,
        );
        let DecomposeOutcome::Created(batch) = decomposer(tracker, model).run(TaskId(1)).await.unwrap()
        else {
            panic!("expected a batch");
        };
        assert!(!batch.roots.is_empty());
        assert!(batch.roots.contains(&TaskId(4)));
    }

    #[tokio::test]
    async fn test_bad_output_flags_parent() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.insert(Task::new(1, "Big", ""));
        let outcome = decomposer(tracker.clone(), ScriptedModel::new().respond(r#"{"tasks": []}"#))
            .run(TaskId(1))
            .await
            .unwrap();
        assert!(matches!(outcome, DecomposeOutcome::Fallback { .. }));
        assert!(tracker.task(TaskId(1)).unwrap().has_label("needs-human-review"));
        assert!(tracker.comments(TaskId(1))[0].contains("decomposition failed"));
        assert_eq!(tracker.tasks().len(), 1);
    }
}

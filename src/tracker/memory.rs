//! In-process tracker used by unit and integration tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{Comment, IssueTracker, NewTask, RunStatus, WorkflowRun};
use crate::core::{CloseReason, Task, TaskId, TaskState};
use crate::error::{Error, Result};

/// A recorded `dispatch_workflow` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub workflow: String,
    pub git_ref: String,
    pub inputs: BTreeMap<String, String>,
}

impl Dispatch {
    /// The `issue_number` input, if present and numeric.
    pub fn task(&self) -> Option<TaskId> {
        self.inputs
            .get("issue_number")
            .and_then(|v| v.parse::<u64>().ok())
            .map(TaskId)
    }
}

#[derive(Default)]
struct State {
    tasks: BTreeMap<TaskId, Task>,
    comments: Vec<(TaskId, Comment)>,
    runs: Vec<WorkflowRun>,
    dispatches: Vec<Dispatch>,
    next_task: u64,
    next_comment: u64,
    next_run: u64,
    register_runs: bool,
    get_calls: HashMap<TaskId, usize>,
    fail_create_in: Option<usize>,
}

pub struct MemoryTracker {
    state: Mutex<State>,
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_task: 1,
                next_comment: 1,
                next_run: 1,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// When enabled, every dispatch also records an in-progress run.
    pub fn set_register_runs(&self, enabled: bool) {
        self.lock().register_runs = enabled;
    }

    /// Make the `n`th `create_task` from now fail once with a 502.
    pub fn fail_nth_create(&self, n: usize) {
        self.lock().fail_create_in = Some(n.max(1));
    }

    pub fn insert(&self, task: Task) {
        let mut state = self.lock();
        state.next_task = state.next_task.max(task.id.0 + 1);
        state.tasks.insert(task.id, task);
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.lock().tasks.get(&id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.values().cloned().collect()
    }

    pub fn comments(&self, id: TaskId) -> Vec<String> {
        self.lock()
            .comments
            .iter()
            .filter(|(t, _)| *t == id)
            .map(|(_, c)| c.body.clone())
            .collect()
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.lock().dispatches.clone()
    }

    pub fn add_run(&self, run: WorkflowRun) {
        self.lock().runs.push(run);
    }

    /// Number of `get_task` calls made for `id`.
    pub fn get_calls(&self, id: TaskId) -> usize {
        self.lock().get_calls.get(&id).copied().unwrap_or(0)
    }

    fn with_task<T>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> T) -> Result<T> {
        let mut state = self.lock();
        let task = state.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id.0))?;
        Ok(f(task))
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn get_task(&self, id: TaskId) -> Result<Task> {
        let mut state = self.lock();
        *state.get_calls.entry(id).or_insert(0) += 1;
        state.tasks.get(&id).cloned().ok_or(Error::TaskNotFound(id.0))
    }

    async fn list_open_tasks(&self, label: Option<&str>) -> Result<Vec<Task>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|t| !t.is_closed())
            .filter(|t| label.map_or(true, |l| t.has_label(l)))
            .cloned()
            .collect())
    }

    async fn create_task(&self, new: &NewTask) -> Result<TaskId> {
        let mut state = self.lock();
        if let Some(n) = state.fail_create_in {
            state.fail_create_in = n.checked_sub(1).filter(|left| *left > 0);
            if n == 1 {
                return Err(Error::api(502, "Bad Gateway"));
            }
        }
        let id = TaskId(state.next_task);
        state.next_task += 1;
        let task = Task::new(id, &new.title, &new.body).with_labels(new.labels.iter().cloned());
        state.tasks.insert(id, task);
        Ok(id)
    }

    async fn update_task_body(&self, id: TaskId, body: &str) -> Result<()> {
        self.with_task(id, |t| t.body = body.to_string())
    }

    async fn add_labels(&self, id: TaskId, labels: &[String]) -> Result<()> {
        self.with_task(id, |t| t.labels.extend(labels.iter().cloned()))
    }

    async fn remove_label(&self, id: TaskId, label: &str) -> Result<()> {
        self.with_task(id, |t| {
            t.labels.remove(label);
        })
    }

    async fn list_comments(&self, id: TaskId) -> Result<Vec<Comment>> {
        Ok(self
            .lock()
            .comments
            .iter()
            .filter(|(t, _)| *t == id)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn create_comment(&self, id: TaskId, body: &str) -> Result<u64> {
        let mut state = self.lock();
        if !state.tasks.contains_key(&id) {
            return Err(Error::TaskNotFound(id.0));
        }
        let comment_id = state.next_comment;
        state.next_comment += 1;
        state.comments.push((
            id,
            Comment {
                id: comment_id,
                body: body.to_string(),
            },
        ));
        Ok(comment_id)
    }

    async fn update_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        let mut state = self.lock();
        let comment = state
            .comments
            .iter_mut()
            .map(|(_, c)| c)
            .find(|c| c.id == comment_id)
            .ok_or_else(|| Error::api(404, "comment not found"))?;
        comment.body = body.to_string();
        Ok(())
    }

    async fn close_task(&self, id: TaskId, reason: CloseReason) -> Result<()> {
        self.with_task(id, |t| {
            t.state = TaskState::Closed {
                reason: Some(reason),
            }
        })
    }

    async fn dispatch_workflow(
        &self,
        workflow: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.lock();
        state.dispatches.push(Dispatch {
            workflow: workflow.to_string(),
            git_ref: git_ref.to_string(),
            inputs: inputs.clone(),
        });
        if state.register_runs {
            let id = state.next_run;
            state.next_run += 1;
            let title = match inputs.get("issue_number") {
                Some(n) => format!("{} #{}", workflow, n),
                None => workflow.to_string(),
            };
            state.runs.push(WorkflowRun {
                id,
                workflow: workflow.to_string(),
                title,
                status: RunStatus::Queued,
                created_at: Utc::now(),
                html_url: format!("https://ci.example.com/runs/{}", id),
            });
        }
        Ok(())
    }

    async fn list_workflow_runs(&self, workflow: &str) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<WorkflowRun> = self
            .lock()
            .runs
            .iter()
            .filter(|r| r.workflow == workflow)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(runs)
    }
}

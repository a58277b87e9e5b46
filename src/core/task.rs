//! Task data model.
//!
//! A task mirrors one issue-tracker record. The tracker is the source of
//! truth: a `Task` is a snapshot read during one invocation and is never
//! persisted or cached across invocations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::LabelConfig;

/// Tracker-assigned task number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Why a task was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Completed,
    NotPlanned,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Completed => "completed",
            CloseReason::NotPlanned => "not_planned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskState {
    Open,
    Closed { reason: Option<CloseReason> },
}

impl TaskState {
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskState::Closed { .. })
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Open => write!(f, "open"),
            TaskState::Closed { reason: Some(r) } => write!(f, "closed ({})", r.as_str()),
            TaskState::Closed { reason: None } => write!(f, "closed"),
        }
    }
}

/// Complexity tier assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Trivial,
    Medium,
    Complex,
    Skip,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Trivial => "trivial",
            Tier::Medium => "medium",
            Tier::Complex => "complex",
            Tier::Skip => "skip",
        }
    }

    /// Lenient parse of a model-supplied tier string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trivial" | "simple" => Some(Tier::Trivial),
            "medium" | "moderate" => Some(Tier::Medium),
            "complex" | "large" => Some(Tier::Complex),
            "skip" => Some(Tier::Skip),
            _ => None,
        }
    }

    pub fn label<'a>(&self, labels: &'a LabelConfig) -> &'a str {
        match self {
            Tier::Trivial => &labels.trivial,
            Tier::Medium => &labels.medium,
            Tier::Complex => &labels.complex,
            Tier::Skip => &labels.skip,
        }
    }

    /// Tier recorded on a task's labels, if any.
    pub fn from_labels(task_labels: &BTreeSet<String>, labels: &LabelConfig) -> Option<Self> {
        [Tier::Trivial, Tier::Medium, Tier::Complex, Tier::Skip]
            .into_iter()
            .find(|tier| task_labels.contains(tier.label(labels)))
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A snapshot of one tracked task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    pub state: TaskState,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, title: &str, body: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            body: body.to_string(),
            labels: BTreeSet::new(),
            state: TaskState::Open,
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn closed(mut self, reason: CloseReason) -> Self {
        self.state = TaskState::Closed {
            reason: Some(reason),
        };
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn tier(&self, labels: &LabelConfig) -> Option<Tier> {
        Tier::from_labels(&self.labels, labels)
    }
}

//! Core domain models for conductor.
//!
//! Tasks as read from the tracker, dependency declarations embedded in task
//! bodies, and the transient graph used while decomposing a batch.

pub mod dag;
pub mod dependency;
pub mod task;

pub use dag::{DropReason, SubtaskGraph};
pub use dependency::{evaluate, DependencyParser, Readiness};
pub use task::{CloseReason, Task, TaskId, TaskState, Tier};

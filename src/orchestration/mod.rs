//! Pipeline components built on the tracker seam.
//!
//! The classifier routes a new task, the decomposer splits complex ones into
//! a batch of subtasks, the resolver starts runs as prerequisites close, and
//! the coordinator wraps each individual run.

pub mod classifier;
pub mod coordinator;
pub mod decomposer;
pub mod failure;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod resolver;

pub use classifier::{Classification, Classifier, FALLBACK_REASONING};
pub use coordinator::{check_duplicate, Coordinator, DuplicateReason, GuardVerdict, RunContext};
pub use decomposer::{Batch, DecomposeOutcome, Decomposer, Decomposition, Subtask};
pub use failure::{classify_failure, FailureKind};
pub use pipeline::{Pipeline, RouteReport};
pub use progress::{ProgressReporter, ProgressUpdate, Stage};
pub use publish::{report_publish_failure, GitCliPusher, PublishOutcome, Publisher, Pusher};
pub use resolver::{ResolveReport, Resolver, SkipReason, Trigger};

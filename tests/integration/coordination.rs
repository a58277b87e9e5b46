//! Run lifecycle and the duplicate-run guard.

use chrono::{Duration, Utc};

use conductor::core::{Task, TaskId};
use conductor::orchestration::{
    DuplicateReason, FailureKind, GuardVerdict, ProgressUpdate, RunContext, Stage,
};

use crate::fixtures::{in_flight_run, Harness};

const WORKFLOW: &str = "ai-implement.yml";

fn ctx(task: u64, run_id: u64) -> RunContext {
    RunContext::new(TaskId(task), WORKFLOW).with_run(
        Some(run_id),
        Some(format!("https://ci.example.com/runs/{}", run_id)),
    )
}

#[tokio::test]
async fn test_run_inside_window_is_duplicate() {
    let h = Harness::new();
    h.seed([Task::new(7, "t", "")]);
    h.tracker
        .add_run(in_flight_run(100, WORKFLOW, 7, Utc::now() - Duration::minutes(3)));

    let verdict = h.coordinator().start(&ctx(7, 101)).await.unwrap();

    assert!(matches!(
        verdict,
        GuardVerdict::Duplicate(DuplicateReason::RecentRun { run_id: 100, .. })
    ));
    let task = h.tracker.task(TaskId(7)).unwrap();
    assert!(!task.has_label("ai:processing"));
    let comments = h.tracker.comments(TaskId(7));
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("Duplicate run skipped"));
    assert!(comments[0].contains("runs/101"));
}

#[tokio::test]
async fn test_run_outside_window_is_not_duplicate() {
    let h = Harness::new();
    h.seed([Task::new(7, "t", "")]);
    h.tracker
        .add_run(in_flight_run(100, WORKFLOW, 7, Utc::now() - Duration::minutes(16)));

    let verdict = h.coordinator().start(&ctx(7, 101)).await.unwrap();
    assert_eq!(verdict, GuardVerdict::Proceed);
    assert!(h.tracker.task(TaskId(7)).unwrap().has_label("ai:processing"));
}

#[tokio::test]
async fn test_sibling_runs_do_not_block_each_other() {
    let h = Harness::new();
    h.seed([Task::new(7, "t", ""), Task::new(8, "u", "")]);
    h.tracker.add_run(in_flight_run(100, WORKFLOW, 7, Utc::now()));
    h.tracker.add_run(in_flight_run(101, WORKFLOW, 8, Utc::now()));

    let c = h.coordinator();
    assert_eq!(c.start(&ctx(7, 100)).await.unwrap(), GuardVerdict::Proceed);
    assert_eq!(c.start(&ctx(8, 101)).await.unwrap(), GuardVerdict::Proceed);
}

#[tokio::test]
async fn test_full_success_lifecycle_keeps_one_progress_comment() {
    let h = Harness::new();
    h.seed([Task::new(7, "t", "").with_labels(["complexity:trivial"])]);
    let c = h.coordinator();
    let run = ctx(7, 100);

    c.start(&run).await.unwrap();
    for (stage, status) in [
        (Stage::Analyzing, "Reading the codebase"),
        (Stage::Implementing, "Editing files"),
        (Stage::Testing, "Running tests"),
        (Stage::Publishing, "Pushing branch"),
    ] {
        c.report(&run, ProgressUpdate::new(stage, status)).await.unwrap();
    }
    c.complete(&run, Some("#88".to_string())).await.unwrap();

    let comments = h.tracker.comments(TaskId(7));
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("✅ Completed"));
    assert!(comments[0].contains(&"█".repeat(20)));
    assert!(comments[0].contains("**Pull request:** #88"));

    let task = h.tracker.task(TaskId(7)).unwrap();
    assert!(task.is_closed());
    assert!(task.has_label("ai-completed"));
    assert!(!task.has_label("ai:processing"));
}

#[tokio::test]
async fn test_failure_is_classified_and_task_left_open() {
    let h = Harness::new();
    h.seed([Task::new(7, "t", "")]);
    let c = h.coordinator();
    let run = ctx(7, 100);
    c.start(&run).await.unwrap();

    let mut output = "x".repeat(5000);
    output.push_str("\nError: The job running on runner GitHub Actions 2 has exceeded the maximum execution time of 60 minutes.");
    let kind = c.fail(&run, &output).await.unwrap();

    assert_eq!(kind, FailureKind::Timeout);
    let task = h.tracker.task(TaskId(7)).unwrap();
    assert!(!task.is_closed());
    assert!(!task.has_label("ai:processing"));

    let failure = h
        .tracker
        .comments(TaskId(7))
        .into_iter()
        .find(|c| c.contains("Automated run failed"))
        .unwrap();
    assert!(failure.contains("Split the task"));
    assert!(failure.contains("maximum execution time"));
    assert!(failure.contains("https://ci.example.com/runs/100"));
    // Only the tail of the output is embedded.
    assert!(!failure.contains(&"x".repeat(3000)));

    // A retry after the failure is allowed once the old run is no longer in flight.
    let retry = RunContext::new(TaskId(7), WORKFLOW).with_run(Some(102), None);
    assert_eq!(c.start(&retry).await.unwrap(), GuardVerdict::Proceed);
}

#[tokio::test]
async fn test_two_runs_for_one_task_keep_the_older() {
    let h = Harness::new();
    h.seed([Task::new(7, "t", "")]);
    h.tracker
        .add_run(in_flight_run(1, WORKFLOW, 7, Utc::now() - Duration::minutes(1)));
    h.tracker.add_run(in_flight_run(2, WORKFLOW, 7, Utc::now()));
    let c = h.coordinator();

    // The newer run checks first and backs off in favour of the older one.
    assert!(matches!(
        c.start(&ctx(7, 2)).await.unwrap(),
        GuardVerdict::Duplicate(DuplicateReason::RecentRun { run_id: 1, .. })
    ));
    assert_eq!(c.start(&ctx(7, 1)).await.unwrap(), GuardVerdict::Proceed);
    assert!(h.tracker.task(TaskId(7)).unwrap().has_label("ai:processing"));
}

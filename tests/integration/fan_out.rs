//! Dependency resolution and parallel fan-out.

use conductor::core::{CloseReason, Task, TaskId};
use conductor::orchestration::{GuardVerdict, RunContext, SkipReason};
use conductor::tracker::IssueTracker;

use crate::fixtures::{subtask, Harness};

#[tokio::test(start_paused = true)]
async fn test_closing_shared_prerequisite_triggers_all_dependents_in_one_pass() {
    let h = Harness::new();
    h.seed([
        Task::new(1, "A", "").closed(CloseReason::Completed),
        Task::new(2, "B", "**前置依赖:** #1").with_labels(["complexity:trivial"]),
        Task::new(3, "C", "*前置依赖*：#1").with_labels(["complexity:medium"]),
    ]);

    let report = h.resolver().on_task_closed(TaskId(1)).await.unwrap();

    assert_eq!(report.triggered_tasks(), vec![TaskId(2), TaskId(3)]);
    let dispatched: Vec<Option<TaskId>> = h.tracker.dispatches().iter().map(|d| d.task()).collect();
    assert_eq!(dispatched, vec![Some(TaskId(2)), Some(TaskId(3))]);
    assert!(report.triggered.iter().all(|t| t.direct_link));
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_sleeps_run_concurrently() {
    let h = Harness::new();
    h.seed((2..=6).map(|id| Task::new(id, "dep", "前置依赖: #1")));
    h.seed([Task::new(1, "A", "").closed(CloseReason::Completed)]);

    let start = tokio::time::Instant::now();
    let report = h.resolver().on_task_closed(TaskId(1)).await.unwrap();

    assert_eq!(report.triggered.len(), 5);
    // One link-poll delay for the whole pass, not one per task.
    let poll = h.config.coordinator.link_poll_delay();
    assert!(start.elapsed() < poll * 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_prerequisite_blocks_until_it_closes() {
    let h = Harness::new();
    h.seed([
        Task::new(1, "A", "").closed(CloseReason::Completed),
        Task::new(2, "B", ""),
        Task::new(3, "C", "**前置依赖:** #1, #2"),
    ]);
    let resolver = h.resolver();

    let report = resolver.on_task_closed(TaskId(1)).await.unwrap();
    assert!(report.triggered.is_empty());
    assert_eq!(report.blocked, vec![(TaskId(3), vec![TaskId(2)])]);
    assert!(h.tracker.dispatches().is_empty());

    h.tracker.close_task(TaskId(2), CloseReason::Completed).await.unwrap();
    let report = resolver.on_task_closed(TaskId(2)).await.unwrap();
    assert_eq!(report.triggered_tasks(), vec![TaskId(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_close_events_do_not_double_trigger() {
    let h = Harness::new();
    h.seed([
        Task::new(10, "parent", ""),
        subtask(11, 10, "无", "complexity:trivial").closed(CloseReason::Completed),
        subtask(12, 10, "无", "complexity:trivial").closed(CloseReason::Completed),
        subtask(13, 10, "#11, #12", "complexity:medium"),
    ]);
    let resolver = h.resolver();

    let first = resolver.on_task_closed(TaskId(12)).await.unwrap();
    assert_eq!(first.triggered_tasks(), vec![TaskId(13)]);

    // The triggered run claims the task before the late event for #11 arrives.
    let run = h
        .tracker
        .list_workflow_runs("ai-design-implement.yml")
        .await
        .unwrap()
        .remove(0);
    let ctx = RunContext::new(TaskId(13), "ai-design-implement.yml")
        .with_run(Some(run.id), Some(run.html_url));
    assert_eq!(h.coordinator().start(&ctx).await.unwrap(), GuardVerdict::Proceed);

    let second = resolver.on_task_closed(TaskId(11)).await.unwrap();
    assert!(second.triggered.is_empty());
    assert_eq!(second.skipped, vec![(TaskId(13), SkipReason::Processing)]);
    assert_eq!(h.tracker.dispatches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_declaration_only_affects_its_task() {
    let h = Harness::new();
    h.seed([
        Task::new(1, "A", "").closed(CloseReason::Completed),
        Task::new(2, "B", "前置依赖: #1"),
        Task::new(3, "C", "前置依赖 #1 (missing colon, mentions #1)"),
    ]);
    let report = h.resolver().on_task_closed(TaskId(1)).await.unwrap();
    // #3 does not declare #1, so it is not a candidate at all.
    assert_eq!(report.triggered_tasks(), vec![TaskId(2)]);

    // Resolved on its own it has no prerequisites and is ready.
    let report = h.resolver().resolve_task(TaskId(3)).await.unwrap();
    assert_eq!(report.triggered_tasks(), vec![TaskId(3)]);
}

//! A complex task from classification through decomposition, staged
//! subtask runs, and the final close of the parent.

use std::sync::Arc;

use conductor::core::{DependencyParser, Task, TaskId, Tier};
use conductor::model::ScriptedModel;
use conductor::orchestration::{
    DecomposeOutcome, GuardVerdict, Pipeline, RunContext, SkipReason, FALLBACK_REASONING,
};
use conductor::tracker::IssueTracker;

use crate::fixtures::{parser, Harness, NOTES_DECOMPOSITION};

const COMPLEX_VERDICT: &str = r#"{"complexity": "complex", "reasoning": "Needs storage, service and UI work.",
    "affected_areas": ["backend", "frontend"], "estimated_hours": 16}"#;

/// Claim the run dispatched for `task`, as the workflow's first step would.
async fn claim(h: &Harness, task: TaskId) -> RunContext {
    let dispatch = h
        .tracker
        .dispatches()
        .into_iter()
        .rev()
        .find(|d| d.task() == Some(task))
        .expect("task was dispatched");
    let run = h
        .tracker
        .list_workflow_runs(&dispatch.workflow)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.mentions_task(task))
        .expect("run registered");
    let ctx = RunContext::new(task, &dispatch.workflow).with_run(Some(run.id), Some(run.html_url));
    assert_eq!(h.coordinator().start(&ctx).await.unwrap(), GuardVerdict::Proceed);
    ctx
}

async fn finish(h: &Harness, ctx: &RunContext) {
    h.coordinator().complete(ctx, None).await.unwrap();
}

fn deps_of(h: &Harness, parser: &DependencyParser, task: u64) -> Vec<TaskId> {
    parser.parse(&h.tracker.task(TaskId(task)).unwrap().body)
}

#[tokio::test(start_paused = true)]
async fn test_complex_task_end_to_end() {
    let h = Harness::new();
    h.seed([Task::new(100, "Notes feature", "Users can write and tag notes.")
        .with_labels(["needs-route"])]);
    let model = ScriptedModel::new()
        .respond(COMPLEX_VERDICT)
        .respond(NOTES_DECOMPOSITION);
    let pipeline = Pipeline::new(h.tracker.clone(), Arc::new(model), &h.config).unwrap();

    let report = pipeline.route(TaskId(100)).await.unwrap();
    assert_eq!(report.classification.tier, Tier::Complex);
    let Some(DecomposeOutcome::Created(batch)) = report.decomposition else {
        panic!("expected a batch");
    };
    assert_eq!(
        batch.children,
        vec![TaskId(101), TaskId(102), TaskId(103), TaskId(104)]
    );

    // Both storage tasks have no prerequisites and start together.
    let first = report.resolve.unwrap();
    assert_eq!(first.triggered_tasks(), vec![TaskId(101), TaskId(102)]);
    assert!(first.triggered.iter().all(|t| t.tier == Tier::Trivial));

    let p = parser();
    assert_eq!(deps_of(&h, &p, 103), vec![TaskId(101), TaskId(102)]);
    assert_eq!(deps_of(&h, &p, 104), vec![TaskId(103)]);
    let parent = h.tracker.task(TaskId(100)).unwrap();
    assert!(parent.has_label("complexity:complex"));
    assert!(!parent.has_label("needs-route"));

    let resolver = pipeline.resolver;

    let run_a = claim(&h, TaskId(101)).await;
    let run_b = claim(&h, TaskId(102)).await;

    finish(&h, &run_a).await;
    let r = resolver.on_task_closed(TaskId(101)).await.unwrap();
    assert!(r.triggered.is_empty());
    assert_eq!(r.skipped, vec![(TaskId(102), SkipReason::Processing)]);
    assert_eq!(
        r.blocked,
        vec![(TaskId(103), vec![TaskId(102)]), (TaskId(104), vec![TaskId(103)])]
    );

    finish(&h, &run_b).await;
    let r = resolver.on_task_closed(TaskId(102)).await.unwrap();
    assert_eq!(r.triggered_tasks(), vec![TaskId(103)]);
    assert_eq!(r.triggered[0].workflow, "ai-design-implement.yml");

    let run = claim(&h, TaskId(103)).await;
    finish(&h, &run).await;
    let r = resolver.on_task_closed(TaskId(103)).await.unwrap();
    assert_eq!(r.triggered_tasks(), vec![TaskId(104)]);
    assert_eq!(r.parent_closed, None);

    let run = claim(&h, TaskId(104)).await;
    finish(&h, &run).await;
    let r = resolver.on_task_closed(TaskId(104)).await.unwrap();
    assert!(r.triggered.is_empty());
    assert_eq!(r.parent_closed, Some(TaskId(100)));

    let parent = h.tracker.task(TaskId(100)).unwrap();
    assert!(parent.is_closed());
    let comments = h.tracker.comments(TaskId(100));
    assert!(comments.iter().any(|c| c.contains("Complexity analysis")));
    assert!(comments.iter().any(|c| c.contains("decomposed into 4 subtasks")));
    assert!(comments.iter().any(|c| c.contains("All subtasks complete")));
    assert_eq!(h.tracker.dispatches().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_model_still_routes_task() {
    let h = Harness::new();
    h.seed([Task::new(5, "Tweak footer", "Make the footer text smaller.")
        .with_labels(["needs-route"])]);
    let model = ScriptedModel::new().respond("```\nnot json\n```");
    let pipeline = Pipeline::new(h.tracker.clone(), Arc::new(model), &h.config).unwrap();

    let report = pipeline.route(TaskId(5)).await.unwrap();

    assert_eq!(report.classification.tier, Tier::Medium);
    assert_eq!(report.classification.reasoning, FALLBACK_REASONING);
    let task = h.tracker.task(TaskId(5)).unwrap();
    assert!(task.has_label("complexity:medium"));
    assert!(task.has_label("needs-human-review"));
    assert!(!task.has_label("needs-route"));
    assert_eq!(h.tracker.dispatches()[0].workflow, "ai-design-implement.yml");
}

#[tokio::test(start_paused = true)]
async fn test_failed_decomposition_flags_parent_without_dispatch() {
    let h = Harness::new();
    h.seed([Task::new(9, "Rewrite", "Everything.")]);
    let model = ScriptedModel::new()
        .respond(r#"{"complexity": "complex"}"#)
        .respond(r#"{"tasks": "not a list"}"#);
    let pipeline = Pipeline::new(h.tracker.clone(), Arc::new(model), &h.config).unwrap();

    let report = pipeline.route(TaskId(9)).await.unwrap();

    assert!(matches!(
        report.decomposition,
        Some(DecomposeOutcome::Fallback { .. })
    ));
    assert!(report.resolve.is_none());
    assert!(h.tracker.dispatches().is_empty());
    assert!(h.tracker.task(TaskId(9)).unwrap().has_label("needs-human-review"));
}

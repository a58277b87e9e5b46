//! Publishing a branch against real temporary repositories.

use std::time::Duration;

use conductor::orchestration::{GitCliPusher, Publisher};
use conductor::Error;

use crate::fixtures::{FlakyPusher, TestRepo};

const RETRY_DELAY: Duration = Duration::from_millis(50);

fn feature_repo() -> TestRepo {
    let repo = TestRepo::new();
    repo.checkout_new_branch("feature");
    repo.commit_file("notes.rs", "pub struct Note;\n");
    repo.commit_file("tags.rs", "pub struct Tag;\n");
    repo
}

#[tokio::test]
async fn test_transient_push_failures_are_retried() {
    let repo = feature_repo();
    let pusher = FlakyPusher::new(2);

    let start = std::time::Instant::now();
    let outcome = Publisher::new(3, RETRY_DELAY)
        .publish(&repo.path, "feature", &repo.base, &pusher)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.new_commits, 2);
    assert_eq!(pusher.calls(), 3);
    assert!(start.elapsed() >= RETRY_DELAY * 2);
    assert_eq!(outcome.output_lines(), "success=true\nnew_commits=2\n");
}

#[tokio::test]
async fn test_exhausted_attempts_fail_the_step() {
    let repo = feature_repo();
    let pusher = FlakyPusher::new(5);

    let err = Publisher::new(3, RETRY_DELAY)
        .publish(&repo.path, "feature", &repo.base, &pusher)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Publish { attempts: 3, .. }));
    assert!(err.to_string().contains("502"));
    assert_eq!(pusher.calls(), 3);
}

#[tokio::test]
async fn test_push_to_origin_then_nothing_left() {
    let repo = feature_repo();
    let pusher = GitCliPusher::new("origin").unwrap();
    let publisher = Publisher::new(3, Duration::ZERO);

    let outcome = publisher
        .publish(&repo.path, "feature", &repo.base, &pusher)
        .await
        .unwrap();
    assert_eq!(outcome.new_commits, 2);
    assert_eq!(outcome.attempts, 1);
    assert!(repo.remote_has_branch("feature"));

    // The push updated origin/feature, so a rerun has nothing to do.
    let again = publisher
        .publish(&repo.path, "feature", &repo.base, &pusher)
        .await
        .unwrap();
    assert!(again.success);
    assert_eq!(again.new_commits, 0);
    assert_eq!(again.attempts, 0);

    repo.commit_file("search.rs", "pub fn search() {}\n");
    let third = publisher
        .publish(&repo.path, "feature", &repo.base, &pusher)
        .await
        .unwrap();
    assert_eq!(third.new_commits, 1);
}

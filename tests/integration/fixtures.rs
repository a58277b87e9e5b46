//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A seeded in-memory tracker and matching config
//! - Canned model responses
//! - Temporary git repositories with a bare `origin`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use conductor::config::{Config, DependencyConfig};
use conductor::core::{DependencyParser, Task};
use conductor::orchestration::{Coordinator, Pusher, Resolver};
use conductor::tracker::{MemoryTracker, RunStatus, WorkflowRun};
use conductor::{Error, Result};

pub fn config() -> Config {
    let mut config = Config::default();
    config.apply_repository("acme/notes");
    config
}

pub fn parser() -> DependencyParser {
    DependencyParser::new(&DependencyConfig::default()).expect("default label compiles")
}

/// Tracker, config and the components built on them.
pub struct Harness {
    pub tracker: Arc<MemoryTracker>,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.set_register_runs(true);
        Self {
            tracker,
            config: config(),
        }
    }

    pub fn seed(&self, tasks: impl IntoIterator<Item = Task>) -> &Self {
        for task in tasks {
            self.tracker.insert(task);
        }
        self
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.tracker.clone(), parser(), &self.config)
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            self.tracker.clone(),
            self.config.labels.clone(),
            self.config.coordinator.clone(),
        )
    }
}

/// A child of `parent` declaring `deps` (e.g. `"#11, #12"` or `"无"`).
pub fn subtask(id: u64, parent: u64, deps: &str, tier_label: &str) -> Task {
    Task::new(
        id,
        &format!("Subtask {}", id),
        &format!(
            "Implement part {}.\n\n- [ ] works\n\n---\n**父任务:** #{}\n**前置依赖:** {}\n",
            id, parent, deps
        ),
    )
    .with_labels(["subtask", tier_label])
}

pub fn in_flight_run(id: u64, workflow: &str, task: u64, started: DateTime<Utc>) -> WorkflowRun {
    WorkflowRun {
        id,
        workflow: workflow.to_string(),
        title: format!("{} #{}", workflow, task),
        status: RunStatus::InProgress,
        created_at: started,
        html_url: format!("https://ci.example.com/runs/{}", id),
    }
}

pub const NOTES_DECOMPOSITION: &str = r#"Here is the plan:
```json
{
  "tasks": [
    {"title": "Create notes table", "description": "Add a migration for the notes table.",
     "category": "data", "priority": 1, "depends_on": [], "estimated_hours": 1,
     "acceptance_criteria": ["migration applies cleanly"]},
    {"title": "Create tags table", "description": "Add a migration for tags.",
     "category": "data", "priority": 1, "depends_on": [], "estimated_hours": 1,
     "acceptance_criteria": []},
    {"title": "Notes service", "description": "CRUD service over notes and tags.",
     "category": "service", "priority": 2, "depends_on": [0, 1], "estimated_hours": 4,
     "acceptance_criteria": ["unit tests cover CRUD"]},
    {"title": "Notes page", "description": "List and edit notes.",
     "category": "presentation", "priority": 3, "depends_on": [2], "estimated_hours": 3,
     "acceptance_criteria": []}
  ],
  "architecture_notes": "Storage first, then service, then UI."
}
```"#;

/// Pusher failing its first `failures` calls, then succeeding.
pub struct FlakyPusher {
    script: Mutex<VecDeque<bool>>,
    calls: Mutex<u32>,
}

impl FlakyPusher {
    pub fn new(failures: usize) -> Self {
        let mut script: VecDeque<bool> = std::iter::repeat(false).take(failures).collect();
        script.push_back(true);
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Pusher for FlakyPusher {
    async fn push(&self, _repo: &Path, _branch: &str) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        match self.script.lock().unwrap().pop_front() {
            Some(true) => Ok(()),
            _ => Err(Error::Publish {
                attempts: 1,
                message: "fatal: unable to access remote: 502".to_string(),
            }),
        }
    }
}

/// Stage everything in the work tree and commit it on HEAD.
fn commit_all(repo: &git2::Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["."].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = repo.signature().unwrap();
    let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

/// A working repository with a bare remote registered as `origin`.
pub struct TestRepo {
    _work: TempDir,
    _remote: TempDir,
    pub path: PathBuf,
    pub remote_path: PathBuf,
    pub base: String,
}

impl TestRepo {
    pub fn new() -> Self {
        let work = TempDir::new().expect("Failed to create temp directory");
        let remote = TempDir::new().expect("Failed to create remote directory");
        git2::Repository::init_bare(remote.path()).expect("Failed to init bare remote");

        let repo = git2::Repository::init(work.path()).expect("Failed to init git");
        let mut cfg = repo.config().expect("Failed to open config");
        cfg.set_str("user.name", "Test User").unwrap();
        cfg.set_str("user.email", "test@test.com").unwrap();
        repo.remote("origin", remote.path().to_str().unwrap())
            .expect("Failed to add remote");

        std::fs::write(work.path().join("README.md"), "# Test Repository\n").unwrap();
        commit_all(&repo, "Initial commit");
        let base = repo.head().unwrap().shorthand().unwrap().to_string();

        Self {
            path: work.path().to_path_buf(),
            remote_path: remote.path().to_path_buf(),
            _work: work,
            _remote: remote,
            base,
        }
    }

    /// Create `name` at HEAD and check it out.
    pub fn checkout_new_branch(&self, name: &str) {
        let repo = git2::Repository::open(&self.path).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch(name, &head, false).unwrap();
        repo.set_head(&format!("refs/heads/{}", name)).unwrap();
    }

    pub fn commit_file(&self, name: &str, content: &str) {
        std::fs::write(self.path.join(name), content).unwrap();
        let repo = git2::Repository::open(&self.path).unwrap();
        commit_all(&repo, &format!("add {}", name));
    }

    pub fn remote_has_branch(&self, name: &str) -> bool {
        let remote = git2::Repository::open_bare(&self.remote_path).unwrap();
        let found = remote
            .find_reference(&format!("refs/heads/{}", name))
            .is_ok();
        found
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{clog_debug, Error, Result};

/// Top-level configuration, loaded once per invocation and handed to each
/// component at construction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub model: ModelConfig,
    pub labels: LabelConfig,
    pub dependencies: DependencyConfig,
    pub coordinator: CoordinatorConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    /// Environment variable holding the API token.
    pub token_env: String,
    pub trunk_branch: String,
    /// Link used when a run's deep link cannot be found in time.
    pub dashboard_url: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            owner: String::new(),
            repo: String::new(),
            token_env: "GITHUB_TOKEN".to_string(),
            trunk_branch: "main".to_string(),
            dashboard_url: None,
        }
    }
}

impl TrackerConfig {
    pub fn dashboard(&self) -> String {
        self.dashboard_url.clone().unwrap_or_else(|| {
            format!("https://github.com/{}/{}/actions", self.owner, self.repo)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub api_base: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 4000,
        }
    }
}

/// Label names. The semantics are fixed; only the names are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub needs_route: String,
    pub trivial: String,
    pub medium: String,
    pub complex: String,
    pub skip: String,
    pub needs_review: String,
    pub processing: String,
    pub completed: String,
    pub subtask: String,
    /// Prefix prepended to affected-area tags from the classifier.
    pub area_prefix: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            needs_route: "needs-route".to_string(),
            trivial: "complexity:trivial".to_string(),
            medium: "complexity:medium".to_string(),
            complex: "complexity:complex".to_string(),
            skip: "skip-ai".to_string(),
            needs_review: "needs-human-review".to_string(),
            processing: "ai:processing".to_string(),
            completed: "ai-completed".to_string(),
            subtask: "subtask".to_string(),
            area_prefix: "area:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    /// Label token introducing the prerequisite list in a task body.
    pub label: String,
    /// Label token introducing the parent (batch) reference.
    pub parent_label: String,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            label: "前置依赖".to_string(),
            parent_label: "父任务".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub duplicate_window_minutes: i64,
    /// Workflow run for trivial tasks (implementation only).
    pub trivial_workflow: String,
    /// Workflow run for medium tasks (design phase, then implementation).
    pub medium_workflow: String,
    pub push_attempts: u32,
    pub push_retry_delay_secs: u64,
    pub link_poll_delay_secs: u64,
    pub output_excerpt_chars: usize,
}

const DEFAULT_DUPLICATE_WINDOW_MINUTES: i64 = 15;

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            duplicate_window_minutes: DEFAULT_DUPLICATE_WINDOW_MINUTES,
            trivial_workflow: "ai-implement.yml".to_string(),
            medium_workflow: "ai-design-implement.yml".to_string(),
            push_attempts: 3,
            push_retry_delay_secs: 5,
            link_poll_delay_secs: 5,
            output_excerpt_chars: 3000,
        }
    }
}

impl CoordinatorConfig {
    fn checked_duplicate_window(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_minutes(self.duplicate_window_minutes)
            .filter(|w| *w >= chrono::Duration::zero())
    }

    /// Falls back to the default window for values `validate` rejects.
    pub fn duplicate_window(&self) -> chrono::Duration {
        self.checked_duplicate_window()
            .unwrap_or_else(|| chrono::Duration::minutes(DEFAULT_DUPLICATE_WINDOW_MINUTES))
    }

    pub fn push_retry_delay(&self) -> Duration {
        Duration::from_secs(self.push_retry_delay_secs)
    }

    pub fn link_poll_delay(&self) -> Duration {
        Duration::from_secs(self.link_poll_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_jitter_ms: 500,
        }
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields defaults; environment overrides apply either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        clog_debug!("Config::load path={}", path.display());
        let mut config = if path.exists() {
            Self::parse(&fs::read_to_string(&path)?)?
        } else {
            clog_debug!("Config file not found, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn apply_env(&mut self) {
        if let Ok(repository) = std::env::var("GITHUB_REPOSITORY") {
            self.apply_repository(&repository);
        }
    }

    /// Apply an `owner/repo` slug, ignoring malformed values.
    pub fn apply_repository(&mut self, slug: &str) {
        if let Some((owner, repo)) = slug.split_once('/') {
            if !owner.is_empty() && !repo.is_empty() {
                self.tracker.owner = owner.to_string();
                self.tracker.repo = repo.to_string();
            }
        }
    }

    pub fn tracker_token(&self) -> Result<String> {
        read_secret(&self.tracker.token_env)
    }

    pub fn model_api_key(&self) -> Result<String> {
        read_secret(&self.model.api_key_env)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracker.owner.is_empty() || self.tracker.repo.is_empty() {
            return Err(Error::Validation(
                "tracker owner/repo not configured (set GITHUB_REPOSITORY)".to_string(),
            ));
        }
        if self.dependencies.label.trim().is_empty() {
            return Err(Error::Validation(
                "dependency label token must not be empty".to_string(),
            ));
        }
        if self.coordinator.push_attempts == 0 {
            return Err(Error::Validation(
                "push_attempts must be at least 1".to_string(),
            ));
        }
        if self.coordinator.checked_duplicate_window().is_none() {
            return Err(Error::Validation(format!(
                "duplicate_window_minutes out of range: {}",
                self.coordinator.duplicate_window_minutes
            )));
        }
        Ok(())
    }
}

fn read_secret(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::MissingCredential(var.to_string())),
    }
}

//! Dependency declarations embedded in task bodies.
//!
//! A declaration looks like `**前置依赖:** #12, #14` or `前置依赖：#3`. The
//! label may carry zero to two emphasis markers on either side, the colon may
//! be ASCII or full-width, and every reference is a `#`-prefixed task number.
//! Whitespace after the colon and around commas may include line breaks.
//!
//! Readiness is a pure function of the parsed references and a live state
//! lookup; nothing here caches tracker state.

use regex::Regex;

use crate::config::DependencyConfig;
use crate::core::task::TaskId;
use crate::error::{Error, Result};

/// Text rendered after the label when a task has no prerequisites.
pub const NO_DEPENDENCIES: &str = "无";

/// Compiled parser for one pair of label tokens.
#[derive(Debug, Clone)]
pub struct DependencyParser {
    label: String,
    parent_label: String,
    declaration: Regex,
    parent: Regex,
    reference: Regex,
}

fn declaration_pattern(label: &str) -> String {
    format!(
        r"\*{{0,2}}{}\*{{0,2}}[:：]\*{{0,2}}\s*((?:#\d+(?:\s*[,，]\s*)?)+)",
        regex::escape(label)
    )
}

fn parent_pattern(label: &str) -> String {
    format!(
        r"\*{{0,2}}{}\*{{0,2}}[:：]\*{{0,2}}\s*#(\d+)",
        regex::escape(label)
    )
}

impl DependencyParser {
    pub fn new(config: &DependencyConfig) -> Result<Self> {
        let build = |pattern: String| {
            Regex::new(&pattern).map_err(|e| Error::Validation(format!("bad label token: {}", e)))
        };
        Ok(Self {
            label: config.label.clone(),
            parent_label: config.parent_label.clone(),
            declaration: build(declaration_pattern(&config.label))?,
            parent: build(parent_pattern(&config.parent_label))?,
            reference: build(r"#(\d+)".to_string())?,
        })
    }

    /// Prerequisites declared in `body`, in declaration order without repeats.
    ///
    /// An absent or malformed declaration yields no prerequisites.
    pub fn parse(&self, body: &str) -> Vec<TaskId> {
        let mut deps = Vec::new();
        for caps in self.declaration.captures_iter(body) {
            let Some(list) = caps.get(1) else { continue };
            for r in self.reference.captures_iter(list.as_str()) {
                if let Some(id) = r.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                    let id = TaskId(id);
                    if !deps.contains(&id) {
                        deps.push(id);
                    }
                }
            }
        }
        deps
    }

    /// Whether `body` lists `target` among its prerequisites.
    pub fn references(&self, body: &str, target: TaskId) -> bool {
        self.parse(body).contains(&target)
    }

    /// Parent (decomposition batch) declared in `body`.
    pub fn parse_parent(&self, body: &str) -> Option<TaskId> {
        self.parent
            .captures(body)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(TaskId)
    }

    /// Render a declaration line for `deps`.
    pub fn render(&self, deps: &[TaskId]) -> String {
        if deps.is_empty() {
            return format!("**{}:** {}", self.label, NO_DEPENDENCIES);
        }
        let refs: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
        format!("**{}:** {}", self.label, refs.join(", "))
    }

    pub fn render_parent(&self, parent: TaskId) -> String {
        format!("**{}:** {}", self.parent_label, parent)
    }
}

/// Readiness of a task against a snapshot of prerequisite states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Blocked { waiting_on: Vec<TaskId> },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Evaluate `deps` against `is_closed`. A reference the lookup cannot
/// resolve counts as not closed.
pub fn evaluate<F>(deps: &[TaskId], is_closed: F) -> Readiness
where
    F: Fn(TaskId) -> Option<bool>,
{
    let waiting_on: Vec<TaskId> = deps
        .iter()
        .copied()
        .filter(|d| !is_closed(*d).unwrap_or(false))
        .collect();
    if waiting_on.is_empty() {
        Readiness::Ready
    } else {
        Readiness::Blocked { waiting_on }
    }
}

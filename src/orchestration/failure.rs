//! Failure classification for automation-run output.
//!
//! The raw output of a failed run is matched against an ordered list of
//! heuristic patterns; the first class with a matching pattern wins. Each
//! class carries a remediation hint that is posted to the task verbatim.

use regex::{RegexSet, RegexSetBuilder};
use std::sync::LazyLock;

/// Failure classes, in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    EditTargetNotFound,
    Timeout,
    RateLimit,
    Permission,
    BuildFailure,
    Unknown,
}

// Patterns are case-insensitive regexes. Status codes only count next to an
// HTTP-ish word so hashes and line numbers do not match.
const EDIT_TARGET_PATTERNS: &[&str] = &[
    r"old_string not found",
    r"string to replace not found",
    r"could not find the text to replace",
    r"no match found for edit",
    r"edit target not found",
    r"file has been modified since read",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    r"\btimed out\b",
    r"\btimeout",
    r"\bdeadline exceeded\b",
    r"exceeded the maximum execution time",
    r"the job running on runner",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    r"\brate[ _-]?limit",
    r"\btoo many requests\b",
    r"\b(?:http|status|code|error|response)[^\n\d]{0,12}\b429\b",
    r"\boverloaded\b",
    r"\bquota exceeded\b",
];

const PERMISSION_PATTERNS: &[&str] = &[
    r"\bpermission denied\b",
    r"resource not accessible by integration",
    r"\b(?:http|status|code|error|response)[^\n\d]{0,12}\b403\b",
    r"\bforbidden\b",
    r"\bauthentication failed\b",
    r"\bbad credentials\b",
];

const BUILD_PATTERNS: &[&str] = &[
    r"\bbuild failed\b",
    r"\bcompilation failed\b",
    r"\berror\[E\d{4}\]",
    r"\berror TS\d+",
    r"\bnpm ERR!",
    r"\bcannot find module\b",
    r"\bSyntaxError\b",
    r"^\S+\.go:\d+:\d+: ",
    r"\btests? failed\b",
];

const ORDERED: &[(FailureKind, &[&str])] = &[
    (FailureKind::EditTargetNotFound, EDIT_TARGET_PATTERNS),
    (FailureKind::Timeout, TIMEOUT_PATTERNS),
    (FailureKind::RateLimit, RATE_LIMIT_PATTERNS),
    (FailureKind::Permission, PERMISSION_PATTERNS),
    (FailureKind::BuildFailure, BUILD_PATTERNS),
];

static RULES: LazyLock<Vec<(FailureKind, RegexSet)>> = LazyLock::new(|| {
    ORDERED
        .iter()
        .map(|(kind, patterns)| {
            let set = RegexSetBuilder::new(*patterns)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .expect("failure patterns compile");
            (*kind, set)
        })
        .collect()
});

impl FailureKind {
    pub fn title(&self) -> &'static str {
        match self {
            FailureKind::EditTargetNotFound => "Edit target not found",
            FailureKind::Timeout => "Timeout",
            FailureKind::RateLimit => "Rate limited",
            FailureKind::Permission => "Permission denied",
            FailureKind::BuildFailure => "Build failure",
            FailureKind::Unknown => "Unknown failure",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            FailureKind::EditTargetNotFound => {
                "The agent tried to edit text that no longer exists in the file. \
                 Re-run after syncing the branch with trunk, or add the exact file \
                 paths and current snippets to the task description."
            }
            FailureKind::Timeout => {
                "The run exceeded its time limit. Split the task into smaller \
                 subtasks or narrow the scope in the description, then re-run."
            }
            FailureKind::RateLimit => {
                "The model or platform API rate limit was hit. Wait a few minutes \
                 and re-run; no change to the task is needed."
            }
            FailureKind::Permission => {
                "The automation token lacks a required permission. Check the \
                 workflow `permissions:` block and repository secrets."
            }
            FailureKind::BuildFailure => {
                "The produced change does not build or its tests fail. Review the \
                 log excerpt below, fix the reported errors or clarify the \
                 acceptance criteria, then re-run."
            }
            FailureKind::Unknown => {
                "No known failure pattern matched. Inspect the raw output and the \
                 run log, then re-run or handle the task manually."
            }
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// Classify raw run output.
pub fn classify_failure(output: &str) -> FailureKind {
    RULES
        .iter()
        .find(|(_, set)| set.is_match(output))
        .map(|(kind, _)| *kind)
        .unwrap_or(FailureKind::Unknown)
}

/// Last `max_chars` characters of `output`, safe to embed in a code fence.
pub fn excerpt(output: &str, max_chars: usize) -> String {
    let count = output.chars().count();
    let tail: String = output.chars().skip(count.saturating_sub(max_chars)).collect();
    tail.replace("```", "'''")
}

/// Render the failure comment posted to the task.
pub fn render_failure_comment(
    kind: FailureKind,
    output: &str,
    max_chars: usize,
    run_link: Option<&str>,
) -> String {
    let mut body = format!(
        "## ❌ Automated run failed: {}\n\n**Suggested fix:** {}\n",
        kind.title(),
        kind.remediation()
    );
    if let Some(link) = run_link {
        body.push_str(&format!("\n**Run:** {}\n", link));
    }
    body.push_str(&format!(
        "\n<details>\n<summary>Raw output (last {} characters)</summary>\n\n```\n{}\n```\n</details>\n",
        max_chars,
        excerpt(output, max_chars).trim_end()
    ));
    body
}

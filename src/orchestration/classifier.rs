//! Complexity classifier.
//!
//! Sends a task's title and body to the external model, parses the JSON
//! verdict, relabels the task and posts a summary comment. Any model or
//! parsing failure degrades to the medium tier plus a human-review label so
//! the pipeline always moves forward.

use serde_json::Value;
use std::sync::Arc;

use crate::config::{LabelConfig, ModelConfig};
use crate::core::{Task, TaskId, Tier};
use crate::error::{Error, Result};
use crate::model::{extract_json_object, ModelClient, ModelRequest};
use crate::tracker::{find_or_create_comment, marker, IssueTracker};
use crate::{clog, clog_warn};

pub const FALLBACK_REASONING: &str =
    "automatic analysis failed, defaulting to medium complexity";

const MAX_BODY_CHARS: usize = 8000;
const MAX_AREAS: usize = 5;

const SYSTEM_PROMPT: &str = "You are a senior engineer triaging software change requests \
for an automated coding pipeline. Reply with a single JSON object and nothing else.";

const PROMPT_TEMPLATE: &str = r#"Classify the complexity of the following task.

Tiers:
- "trivial": a small, local change (copy, config, one-file fix). Safe to implement directly.
- "medium": a contained feature or fix touching a few files; needs a short design first.
- "complex": spans multiple layers (data, service, presentation) or many files; must be split into subtasks.
- "skip": not a code change (question, discussion, duplicate, or unclear request).

Respond with JSON of exactly this shape:
{"complexity": "trivial|medium|complex|skip", "reasoning": "<one or two sentences>", "affected_areas": ["<area>", ...], "estimated_hours": <number>}

Task title: {title}

Task body:
{body}
"#;

/// Parsed classifier verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    pub reasoning: String,
    pub affected_areas: Vec<String>,
    pub estimated_hours: Option<f64>,
    /// True when the verdict is the fallback default.
    pub fallback: bool,
}

impl Classification {
    pub fn fallback() -> Self {
        Self {
            tier: Tier::Medium,
            reasoning: FALLBACK_REASONING.to_string(),
            affected_areas: Vec::new(),
            estimated_hours: None,
            fallback: true,
        }
    }
}

pub fn build_prompt(title: &str, body: &str) -> String {
    let body: String = body.chars().take(MAX_BODY_CHARS).collect();
    PROMPT_TEMPLATE
        .replace("{title}", title.trim())
        .replace("{body}", body.trim())
}

fn sanitize_area(area: &str) -> Option<String> {
    let cleaned: String = area
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '/'))
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Validate a raw model response. Every field except the tier has a default.
pub fn parse_classification(raw: &str) -> Result<Classification> {
    let value = extract_json_object(raw)
        .ok_or_else(|| Error::Classifier("response contains no JSON object".to_string()))?;

    let tier = value
        .get("complexity")
        .and_then(Value::as_str)
        .and_then(Tier::parse)
        .ok_or_else(|| Error::Classifier("missing or unknown complexity".to_string()))?;

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut affected_areas: Vec<String> = Vec::new();
    for area in value
        .get("affected_areas")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter_map(sanitize_area)
    {
        if !affected_areas.contains(&area) && affected_areas.len() < MAX_AREAS {
            affected_areas.push(area);
        }
    }

    let estimated_hours = value
        .get("estimated_hours")
        .and_then(Value::as_f64)
        .filter(|h| h.is_finite() && *h >= 0.0);

    Ok(Classification {
        tier,
        reasoning,
        affected_areas,
        estimated_hours,
        fallback: false,
    })
}

fn next_action(tier: Tier) -> &'static str {
    match tier {
        Tier::Trivial => "An implementation run will be triggered directly.",
        Tier::Medium => "A design phase will run first, followed by implementation.",
        Tier::Complex => "The task will be decomposed into dependency-ordered subtasks.",
        Tier::Skip => "No automated action will be taken.",
    }
}

const CLASSIFICATION_MARKER_KIND: &str = "classification";

pub fn render_comment(c: &Classification) -> String {
    let mut body = format!(
        "{}\n## 🧭 Complexity analysis\n\n**Complexity:** `{}`\n\n**Reasoning:** {}\n",
        marker(CLASSIFICATION_MARKER_KIND),
        c.tier,
        if c.reasoning.is_empty() { "-" } else { &c.reasoning }
    );
    if !c.affected_areas.is_empty() {
        body.push_str(&format!("\n**Affected areas:** {}\n", c.affected_areas.join(", ")));
    }
    if let Some(hours) = c.estimated_hours {
        body.push_str(&format!("\n**Estimated effort:** {:.1}h\n", hours));
    }
    body.push_str(&format!("\n**Next step:** {}\n", next_action(c.tier)));
    if c.fallback {
        body.push_str("\n⚠️ Automatic analysis was unavailable; a human should review this classification.\n");
    }
    body
}

/// Labels to add for a verdict.
pub fn labels_for(c: &Classification, labels: &LabelConfig) -> Vec<String> {
    let mut out = vec![c.tier.label(labels).to_string()];
    out.extend(
        c.affected_areas
            .iter()
            .map(|a| format!("{}{}", labels.area_prefix, a)),
    );
    if c.fallback {
        out.push(labels.needs_review.clone());
    }
    out
}

pub struct Classifier {
    tracker: Arc<dyn IssueTracker>,
    model: Arc<dyn ModelClient>,
    labels: LabelConfig,
    temperature: f32,
}

impl Classifier {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        model: Arc<dyn ModelClient>,
        labels: LabelConfig,
        model_config: &ModelConfig,
    ) -> Self {
        Self {
            tracker,
            model,
            labels,
            temperature: model_config.temperature,
        }
    }

    /// Ask the model for a verdict. Never fails: errors become the fallback.
    pub async fn classify(&self, task: &Task) -> Classification {
        let request = ModelRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: build_prompt(&task.title, &task.body),
            temperature: self.temperature,
            json: true,
        };
        let verdict = match self.model.complete(&request).await {
            Ok(raw) => parse_classification(&raw),
            Err(e) => Err(e),
        };
        match verdict {
            Ok(c) => c,
            Err(e) => {
                clog_warn!("classification of {} failed, using fallback: {}", task.id, e);
                Classification::fallback()
            }
        }
    }

    /// Classify a task and record the verdict on the tracker.
    pub async fn run(&self, id: TaskId) -> Result<Classification> {
        let task = self.tracker.get_task(id).await?;
        let classification = self.classify(&task).await;
        self.apply(&task, &classification).await?;
        clog!(
            "classified {} as {}{}",
            id,
            classification.tier,
            if classification.fallback { " (fallback)" } else { "" }
        );
        Ok(classification)
    }

    /// Swap the routing label for the verdict's labels and post the summary.
    /// A reclassification rewrites the earlier summary in place.
    pub async fn apply(&self, task: &Task, c: &Classification) -> Result<()> {
        self.tracker
            .add_labels(task.id, &labels_for(c, &self.labels))
            .await?;

        let new_tier = c.tier.label(&self.labels);
        let stale: Vec<&str> = [Tier::Trivial, Tier::Medium, Tier::Complex, Tier::Skip]
            .iter()
            .map(|t| t.label(&self.labels))
            .filter(|l| *l != new_tier && task.has_label(l))
            .collect();
        self.tracker
            .remove_label(task.id, &self.labels.needs_route)
            .await?;
        for label in stale {
            self.tracker.remove_label(task.id, label).await?;
        }

        let body = render_comment(c);
        let (id, created) = find_or_create_comment(
            self.tracker.as_ref(),
            task.id,
            &marker(CLASSIFICATION_MARKER_KIND),
            &body,
        )
        .await?;
        if !created {
            self.tracker.update_comment(id, &body).await?;
        }
        Ok(())
    }
}

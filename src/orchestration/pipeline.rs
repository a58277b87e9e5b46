//! Routing of a freshly filed task: classify, then either decompose and
//! start the batch, or hand the task straight to the resolver.

use std::sync::Arc;

use crate::config::Config;
use crate::core::{DependencyParser, TaskId, Tier};
use crate::error::Result;
use crate::model::ModelClient;
use crate::orchestration::classifier::{Classification, Classifier};
use crate::orchestration::decomposer::{DecomposeOutcome, Decomposer};
use crate::orchestration::resolver::{ResolveReport, Resolver};
use crate::tracker::IssueTracker;
use crate::clog;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteReport {
    pub classification: Classification,
    pub decomposition: Option<DecomposeOutcome>,
    pub resolve: Option<ResolveReport>,
}

pub struct Pipeline {
    pub classifier: Classifier,
    pub decomposer: Decomposer,
    pub resolver: Resolver,
}

impl Pipeline {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        model: Arc<dyn ModelClient>,
        config: &Config,
    ) -> Result<Self> {
        let parser = DependencyParser::new(&config.dependencies)?;
        Ok(Self {
            classifier: Classifier::new(
                tracker.clone(),
                model.clone(),
                config.labels.clone(),
                &config.model,
            ),
            decomposer: Decomposer::new(
                tracker.clone(),
                model,
                parser.clone(),
                config.labels.clone(),
                &config.model,
            ),
            resolver: Resolver::new(tracker, parser, config),
        })
    }

    pub async fn route(&self, id: TaskId) -> Result<RouteReport> {
        let classification = self.classifier.run(id).await?;
        let mut report = RouteReport {
            classification: classification.clone(),
            decomposition: None,
            resolve: None,
        };

        match classification.tier {
            Tier::Skip => clog!("{} marked skip, no automation", id),
            Tier::Complex => {
                let outcome = self.decomposer.run(id).await?;
                if let DecomposeOutcome::Created(batch) = &outcome {
                    report.resolve = Some(self.resolver.resolve_batch(batch.parent).await?);
                }
                report.decomposition = Some(outcome);
            }
            Tier::Trivial | Tier::Medium => {
                report.resolve = Some(self.resolver.resolve_task(id).await?);
            }
        }
        Ok(report)
    }
}

//! Machine-readable report of a completed run.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::analysis::{Aggregate, DuplicateGroup, OldestInstance, Rating, ServiceTally, OFFLINE_SCORE};
use crate::config::ChecksConfig;
use crate::instance::{ApiVariant, Instance, FRONTEND_SERVICE};
use crate::services::ServiceCatalog;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    /// Highest score first.
    pub instances: Vec<InstanceReport>,
    pub services: BTreeMap<String, ServiceTally>,
    pub duplicates: Vec<DuplicateGroup>,
    pub oldest: Option<OldestInstance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub id: String,
    pub api: String,
    pub frontend: Option<String>,
    pub protocol: String,
    pub online: bool,
    pub official: bool,
    pub variant: Option<ApiVariant>,
    pub version: Option<String>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub remote: Option<String>,
    pub fork: bool,
    pub challenge: bool,
    pub frontend_online: bool,
    pub start_time: u64,
    pub score: f64,
    pub rating: Option<Rating>,
    pub tests: BTreeMap<String, ServiceOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOutcome {
    pub status: bool,
    pub message: Option<String>,
    /// Display name, when the service is in the catalog.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly: Option<String>,
}

impl InstanceReport {
    fn from_instance(instance: &Instance, catalog: &ServiceCatalog, checks: &ChecksConfig) -> Self {
        let state = instance.probe_state();
        let (score, rating) = instance
            .scorecard()
            .map_or((OFFLINE_SCORE, None), |card| (card.score, card.rating));

        let tests = instance
            .results()
            .into_iter()
            .map(|r| {
                let friendly = if r.service == FRONTEND_SERVICE {
                    Some("Frontend".to_string())
                } else {
                    catalog.get(&r.service).map(|s| s.name.clone())
                };
                let outcome = ServiceOutcome {
                    status: r.success,
                    message: r.message,
                    friendly,
                };
                (r.service, outcome)
            })
            .collect();

        Self {
            id: instance.id().to_string(),
            api: instance.api().to_string(),
            frontend: instance.front_end().map(str::to_string),
            protocol: instance.protocol().to_string(),
            online: state.api_healthy,
            official: checks.is_official_host(instance.api()),
            variant: state.variant,
            version: state.version,
            commit: state.commit,
            branch: state.branch,
            remote: state.remote,
            fork: state.is_fork,
            challenge: state.has_challenge,
            frontend_online: instance.front_end_healthy(),
            start_time: state.start_time,
            score,
            rating,
            tests,
        }
    }
}

impl Report {
    pub fn build(
        instances: &[Arc<Instance>],
        aggregate: Aggregate,
        catalog: &ServiceCatalog,
        checks: &ChecksConfig,
    ) -> Self {
        let mut rows: Vec<InstanceReport> = instances
            .iter()
            .map(|i| InstanceReport::from_instance(i, catalog, checks))
            .collect();
        rows.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.api.cmp(&b.api)));

        Self {
            generated_at: Utc::now(),
            instances: rows,
            services: aggregate.tallies,
            duplicates: aggregate.duplicates,
            oldest: aggregate.oldest,
        }
    }

    pub fn online_count(&self) -> usize {
        self.instances.iter().filter(|i| i.online).count()
    }

    /// Write as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report: {}", path.display()))?;
        info!(path = %path.display(), instances = self.instances.len(), "report written");
        Ok(())
    }
}

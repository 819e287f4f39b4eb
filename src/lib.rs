//! fleetcheck -- health checks, functional tests and scoring for a fleet of
//! independently operated media-fetching API instances.
//!
//! A run has two phases driven by the [`scheduler::Orchestrator`]: every
//! instance is probed, then every healthy instance is tested against every
//! service in the catalog. Results are scored and summarized into a
//! [`report::Report`].

pub mod analysis;
pub mod checks;
pub mod config;
pub mod context;
pub mod http;
pub mod instance;
pub mod probes;
pub mod report;
pub mod scheduler;
pub mod services;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::analysis::ScoringAggregator;
use crate::checks::{plan_service_tests, ServiceTestRunner};
use crate::config::{Credentials, FleetConfig};
use crate::context::RunContext;
use crate::instance::{Instance, InstanceDescriptor, InstanceDirectory, ProbeState};
use crate::probes::{ProbeEngine, ProbeUnit};
use crate::report::Report;
use crate::scheduler::Orchestrator;
use crate::services::ServiceCatalog;

/// Loaded inputs for one run.
pub struct RunInputs {
    pub directory: InstanceDirectory,
    pub catalog: ServiceCatalog,
    pub credentials: Credentials,
}

/// Probe, test and score every instance, returning the finished report.
pub async fn run(config: &FleetConfig, inputs: RunInputs) -> Result<Report> {
    let ctx = Arc::new(RunContext::new(config).context("failed to build HTTP client")?);
    let orchestrator = Orchestrator::from_config(&config.orchestrator);
    let instances = inputs.directory.instances();
    info!(
        instances = instances.len(),
        services = inputs.catalog.len(),
        api_keys = inputs.credentials.len(),
        workers = orchestrator.workers(),
        "starting run"
    );

    // Phase 1: probe every instance
    let engine = Arc::new(ProbeEngine::new(Arc::clone(&ctx)));
    let probes: Vec<ProbeUnit> = instances
        .iter()
        .map(|instance| ProbeUnit {
            engine: Arc::clone(&engine),
            instance: Arc::clone(instance),
        })
        .collect();
    orchestrator.run_batch("probe", probes).await;

    let online = instances.iter().filter(|i| i.is_api_healthy()).count();
    info!(online, offline = instances.len() - online, "probe phase finished");

    // Phase 2: functional tests for healthy instances
    let runner = Arc::new(ServiceTestRunner::new(Arc::clone(&ctx)));
    let tests = plan_service_tests(&runner, instances, &inputs.catalog, &inputs.credentials);
    orchestrator.run_batch("test", tests).await;

    let aggregate = ScoringAggregator::score_all(instances);
    Ok(Report::build(instances, aggregate, &inputs.catalog, &ctx.checks))
}

/// Probe a single instance outside of a full run.
pub async fn probe_one(config: &FleetConfig, descriptor: InstanceDescriptor) -> Result<ProbeState> {
    let ctx = Arc::new(RunContext::new(config).context("failed to build HTTP client")?);
    let instance = Instance::new(descriptor);
    ProbeEngine::new(ctx).probe(&instance).await;
    Ok(instance.probe_state())
}

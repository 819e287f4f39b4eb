//! API health and variant detection for a single instance.
//!
//! A probe is one HEAD against the instance root followed by one JSON GET.
//! Any failure along the way marks the instance offline for the rest of the
//! run; there is no retry at this layer.

pub mod server_info;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::instance::{ApiVariant, Instance, ProbeState};
use crate::scheduler::WorkUnit;

pub use server_info::{ProbeError, ServerInfo, StartTime};

/// Version recorded when the current variant omits one.
pub const UNKNOWN_VERSION: &str = "Unknown";

/// Detects variant, version, health and special flags of instances.
#[derive(Debug, Clone)]
pub struct ProbeEngine {
    ctx: Arc<RunContext>,
}

impl ProbeEngine {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Probe `instance` and store what was learned on it.
    pub async fn probe(&self, instance: &Instance) {
        let state = self.detect(instance).await;
        if state.api_healthy {
            info!(
                api = %instance.api(),
                version = state.version.as_deref().unwrap_or_default(),
                variant = ?state.variant,
                fork = state.is_fork,
                challenge = state.has_challenge,
                "instance is ONLINE"
            );
        } else {
            info!(api = %instance.api(), "instance is OFFLINE");
        }
        instance.set_probe_state(state);
    }

    async fn detect(&self, instance: &Instance) -> ProbeState {
        let api = instance.api();
        let url = instance.base_url();
        info!(%api, "checking API status");

        // 1. Existence check
        match self.ctx.http.head(&url).await {
            Ok(exchange) if exchange.is_success() => {}
            Ok(exchange) => {
                warn!(%api, status = exchange.status, "root HEAD returned non-success status");
                return ProbeState::offline();
            }
            Err(e) => {
                warn!(%api, error = %e, "root HEAD failed");
                return ProbeState::offline();
            }
        }

        // 2. Server info
        let body = match self.ctx.http.get_json(&url).await {
            Ok(exchange) => exchange.body,
            Err(e) => {
                warn!(%api, error = %e, "failed to load server info");
                return ProbeState::offline();
            }
        };
        let Some(body) = body else {
            warn!(%api, "server info body was empty");
            return ProbeState::offline();
        };

        match ServerInfo::parse(&body, &self.ctx.checks.identity_key) {
            Ok(info) => self.state_from(api, info),
            Err(e) => {
                warn!(%api, error = %e, "unusable server info");
                ProbeState::offline()
            }
        }
    }

    /// Translate decoded server info into probe state.
    pub fn state_from(&self, api: &str, info: ServerInfo) -> ProbeState {
        match info {
            ServerInfo::Legacy(legacy) => {
                if let StartTime::Invalid(raw) = &legacy.start_time {
                    warn!(%api, start_time = %raw, "instance reported an invalid startTime");
                }
                ProbeState {
                    api_healthy: true,
                    variant: Some(ApiVariant::Legacy),
                    version: Some(legacy.version),
                    commit: legacy.commit,
                    branch: legacy.branch,
                    start_time: legacy.start_time.epoch(),
                    ..ProbeState::default()
                }
            }
            ServerInfo::Current(current) => {
                if let StartTime::Invalid(raw) = &current.start_time {
                    warn!(%api, start_time = %raw, "instance reported an invalid startTime");
                }
                let mut state = ProbeState {
                    api_healthy: true,
                    variant: Some(ApiVariant::Current),
                    version: Some(current.version.unwrap_or_else(|| UNKNOWN_VERSION.to_string())),
                    start_time: current.start_time.epoch(),
                    has_challenge: current.challenge_site_key.is_some(),
                    ..ProbeState::default()
                };

                match current.git {
                    Some(git) => {
                        if let Some(remote) = &git.remote {
                            if !self.ctx.checks.is_upstream_remote(remote) {
                                warn!(%api, %remote, "instance is running a FORK");
                                state.is_fork = true;
                            }
                        }
                        state.branch = git.branch;
                        state.commit = git.commit;
                        state.remote = git.remote;
                    }
                    None => warn!(%api, "instance is missing git information"),
                }

                if state.has_challenge {
                    warn!(%api, "instance has a bot challenge enabled");
                }
                state
            }
        }
    }
}

/// Phase-one unit: probe one instance.
pub struct ProbeUnit {
    pub engine: Arc<ProbeEngine>,
    pub instance: Arc<Instance>,
}

#[async_trait]
impl WorkUnit for ProbeUnit {
    fn label(&self) -> String {
        format!("{}:check", self.instance.api())
    }

    async fn execute(&self) {
        self.engine.probe(&self.instance).await;
    }
}

//! Immutable per-run context handed to every component at construction.

use crate::config::{ChecksConfig, FleetConfig, RetryConfig};
use crate::http::{ExchangeError, HttpClient};

/// Everything a probe or test needs that is fixed for the whole run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub http: HttpClient,
    pub checks: ChecksConfig,
    pub retry: RetryConfig,
}

impl RunContext {
    pub fn new(config: &FleetConfig) -> Result<Self, ExchangeError> {
        Ok(Self {
            http: HttpClient::new(&config.http)?,
            checks: config.checks.clone(),
            retry: config.retry.clone(),
        })
    }
}

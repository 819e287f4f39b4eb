//! Instances under test and the results recorded against them.
//!
//! An [`Instance`] is shared between tasks as `Arc<Instance>`. Its probe
//! state is written once by the probe task that owns it, its result list is
//! appended to concurrently by service tests, and its scorecard is set once
//! after both phases finish.

pub mod directory;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::analysis::score::Scorecard;

pub use directory::InstanceDirectory;

/// Reserved service id for the front-end check.
pub const FRONTEND_SERVICE: &str = "frontend";

/// Version string recorded for instances that failed the probe.
pub const OFFLINE_VERSION: &str = "Offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(other.to_string()),
        }
    }
}

/// Raw identity of an instance as listed in the instance file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub api: String,
    pub front_end: Option<String>,
    pub protocol: Protocol,
}

/// Which of the two server-info shapes an instance answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiVariant {
    /// Flat `version`/`commit`/`branch`/`startTime` object, API under `/api/json`.
    Legacy,
    /// Nested service block plus optional `git` block, API at the root.
    Current,
}

/// Everything the probe learned about an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeState {
    pub api_healthy: bool,
    pub variant: Option<ApiVariant>,
    pub version: Option<String>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub remote: Option<String>,
    pub is_fork: bool,
    pub has_challenge: bool,
    /// Process start time reported by the instance; 0 when unknown.
    pub start_time: u64,
}

impl ProbeState {
    pub fn offline() -> Self {
        Self {
            api_healthy: false,
            version: Some(OFFLINE_VERSION.to_string()),
            ..Self::default()
        }
    }

    pub fn is_new_variant(&self) -> bool {
        self.variant == Some(ApiVariant::Current)
    }
}

/// Outcome of one functional test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub service: String,
    pub success: bool,
    pub message: Option<String>,
}

impl TestResult {
    pub fn pass(service: &str, message: impl Into<String>) -> Self {
        Self {
            service: service.to_string(),
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn fail(service: &str, message: impl Into<String>) -> Self {
        Self {
            service: service.to_string(),
            success: false,
            message: Some(message.into()),
        }
    }
}

/// One instance under test.
#[derive(Debug)]
pub struct Instance {
    descriptor: InstanceDescriptor,
    id: String,
    probe: RwLock<ProbeState>,
    front_end_healthy: AtomicBool,
    results: Mutex<Vec<TestResult>>,
    scorecard: RwLock<Option<Scorecard>>,
}

impl Instance {
    pub fn new(descriptor: InstanceDescriptor) -> Self {
        let id = instance_id(&descriptor.api);
        Self {
            descriptor,
            id,
            probe: RwLock::new(ProbeState::default()),
            front_end_healthy: AtomicBool::new(false),
            results: Mutex::new(Vec::new()),
            scorecard: RwLock::new(None),
        }
    }

    pub fn api(&self) -> &str {
        &self.descriptor.api
    }

    pub fn front_end(&self) -> Option<&str> {
        self.descriptor.front_end.as_deref()
    }

    pub fn protocol(&self) -> Protocol {
        self.descriptor.protocol
    }

    /// Short stable identifier derived from the API host.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `protocol://api` without a trailing slash.
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}",
            self.descriptor.protocol,
            self.descriptor.api.trim_end_matches('/')
        )
    }

    pub fn front_end_url(&self) -> Option<String> {
        self.front_end()
            .map(|fe| format!("{}://{}", self.descriptor.protocol, fe.trim_end_matches('/')))
    }

    pub fn probe_state(&self) -> ProbeState {
        self.probe
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_probe_state(&self, state: ProbeState) {
        *self.probe.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_api_healthy(&self) -> bool {
        self.probe
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .api_healthy
    }

    pub fn front_end_healthy(&self) -> bool {
        self.front_end_healthy.load(Ordering::Acquire)
    }

    pub fn set_front_end_healthy(&self, healthy: bool) {
        self.front_end_healthy.store(healthy, Ordering::Release);
    }

    /// Record a terminal result. Returns `false` and keeps the existing
    /// entry when this service already has one.
    pub fn add_result(&self, result: TestResult) -> bool {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        if results.iter().any(|r| r.service == result.service) {
            warn!(api = %self.api(), service = %result.service, "duplicate result ignored");
            return false;
        }
        results.push(result);
        true
    }

    pub fn results(&self) -> Vec<TestResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn scorecard(&self) -> Option<Scorecard> {
        *self.scorecard.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_scorecard(&self, card: Scorecard) {
        *self.scorecard.write().unwrap_or_else(PoisonError::into_inner) = Some(card);
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor.api)
    }
}

/// First 10 hex chars of SHA-256 over the API host exactly as listed, so ids
/// stay stable for links published by earlier runs.
pub fn instance_id(api: &str) -> String {
    let digest = Sha256::digest(api.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(10);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn instance(api: &str, front_end: Option<&str>) -> Instance {
        Instance::new(InstanceDescriptor {
            api: api.to_string(),
            front_end: front_end.map(str::to_string),
            protocol: Protocol::Https,
        })
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("HTTPS".parse::<Protocol>(), Ok(Protocol::Https));
        assert_eq!(" http ".parse::<Protocol>(), Ok(Protocol::Http));
        assert!("ftp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_base_url_strips_trailing_slash() {
        let i = instance("api.example.com/", Some("example.com/"));
        assert_eq!(i.base_url(), "https://api.example.com");
        assert_eq!(i.front_end_url().as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_id_is_stable_and_short() {
        let a = instance("api.example.com", None);
        assert_eq!(a.id(), "d0c43d3885");
        assert_eq!(a.id(), instance("api.example.com", Some("example.com")).id());
        assert_ne!(a.id(), instance("api.other.com", None).id());
    }

    #[test]
    fn test_id_hashes_host_as_listed() {
        assert_eq!(instance_id("API.example.com"), "064b862885");
        assert_ne!(instance_id("API.example.com"), instance_id("api.example.com"));
    }

    #[test]
    fn test_offline_state() {
        let state = ProbeState::offline();
        assert!(!state.api_healthy);
        assert_eq!(state.version.as_deref(), Some("Offline"));
        assert!(!state.is_new_variant());
    }

    #[test]
    fn test_one_result_per_service() {
        let i = instance("api.example.com", None);
        assert!(i.add_result(TestResult::pass("youtube", "ok")));
        assert!(!i.add_result(TestResult::fail("youtube", "late")));
        let results = i.results();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let i = Arc::new(instance("api.example.com", None));
        let handles: Vec<_> = (0..16)
            .map(|n| {
                let i = Arc::clone(&i);
                std::thread::spawn(move || {
                    i.add_result(TestResult::pass(&format!("service-{n}"), "ok"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(i.results().len(), 16);
    }
}

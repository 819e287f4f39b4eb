//! Per-service functional tests against live instances.
//!
//! A functional test asks an instance to fetch a known piece of content and
//! interprets the answer. Rate-limited answers are retried a bounded number
//! of times with a randomized backoff; every other outcome is terminal and
//! recorded as exactly one [`TestResult`] on the instance.

pub mod frontend;
pub mod tunnel;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Credentials;
use crate::context::RunContext;
use crate::http::{Exchange, ExchangeError};
use crate::instance::{Instance, TestResult, FRONTEND_SERVICE};
use crate::scheduler::WorkUnit;
use crate::services::ServiceCatalog;

use tunnel::{judge_length, read_length, rewrite_tunnel_url};

/// Path of the functional endpoint on legacy instances.
pub const LEGACY_API_PATH: &str = "/api/json";

/// Message recorded for challenge-gated instances we hold no key for.
pub const CHALLENGE_MESSAGE: &str =
    "Protected by a bot challenge, unable to test via API (no API key)";

/// Statuses a healthy instance may answer a fetch request with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Redirect,
    Stream,
    Tunnel,
    Success,
    Picker,
    LocalProcessing,
}

impl FromStr for ResponseStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redirect" => Ok(ResponseStatus::Redirect),
            "stream" => Ok(ResponseStatus::Stream),
            "tunnel" => Ok(ResponseStatus::Tunnel),
            "success" => Ok(ResponseStatus::Success),
            "picker" => Ok(ResponseStatus::Picker),
            "local-processing" => Ok(ResponseStatus::LocalProcessing),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseStatus::Redirect => "redirect",
            ResponseStatus::Stream => "stream",
            ResponseStatus::Tunnel => "tunnel",
            ResponseStatus::Success => "success",
            ResponseStatus::Picker => "picker",
            ResponseStatus::LocalProcessing => "local-processing",
        };
        write!(f, "{s}")
    }
}

/// Result of a single request attempt.
#[derive(Debug)]
enum Attempt {
    Finished(TestResult),
    RateLimited(String),
}

/// Executes functional tests, one (instance, service) pair at a time.
#[derive(Debug, Clone)]
pub struct ServiceTestRunner {
    ctx: Arc<RunContext>,
}

impl ServiceTestRunner {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Run one test and record its terminal result on `instance`.
    pub async fn run(
        &self,
        instance: &Instance,
        service: &str,
        content_url: &str,
        api_key: Option<&str>,
    ) {
        let result = if service == FRONTEND_SERVICE {
            self.run_front_end_test(instance, content_url).await
        } else {
            self.run_api_test(instance, service, content_url, api_key).await
        };
        instance.add_result(result);
    }

    async fn run_front_end_test(&self, instance: &Instance, url: &str) -> TestResult {
        let result =
            frontend::check(&self.ctx.http, url, &self.ctx.checks.frontend_marker).await;
        if result.success {
            info!(api = %instance.api(), %url, "Test PASS for frontend");
        } else {
            warn!(
                api = %instance.api(),
                %url,
                reason = result.message.as_deref().unwrap_or_default(),
                "Test FAIL for frontend"
            );
        }
        instance.set_front_end_healthy(result.success);
        result
    }

    async fn run_api_test(
        &self,
        instance: &Instance,
        service: &str,
        content_url: &str,
        api_key: Option<&str>,
    ) -> TestResult {
        let endpoint = api_endpoint(instance);
        let body = json!({ "url": content_url });
        let max_attempts = self.ctx.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let started = Instant::now();
            let outcome = self.ctx.http.post_json(&endpoint, &body, api_key).await;
            let http_status = outcome.as_ref().map(|e| e.status).ok();
            let attempt = self.interpret(instance, service, outcome).await;
            let elapsed_ms = started.elapsed().as_millis();

            match attempt {
                Attempt::Finished(result) => {
                    let reason = result.message.as_deref().unwrap_or_default();
                    if result.success {
                        info!(%endpoint, %service, ?http_status, attempts, elapsed_ms, reason, "Test PASS");
                    } else {
                        warn!(%endpoint, %service, ?http_status, attempts, elapsed_ms, reason, "Test FAIL");
                    }
                    return result;
                }
                Attempt::RateLimited(reason) if attempts >= max_attempts => {
                    warn!(
                        %endpoint,
                        %service,
                        ?http_status,
                        attempts,
                        elapsed_ms,
                        %reason,
                        "Test FAIL, rate-limit attempts exhausted"
                    );
                    return TestResult::fail(
                        service,
                        format!("Rate limited, max attempts reached ({max_attempts})"),
                    );
                }
                Attempt::RateLimited(reason) => {
                    let wait = self.ctx.retry.backoff();
                    warn!(
                        %endpoint,
                        %service,
                        attempts,
                        elapsed_ms,
                        %reason,
                        wait_ms = wait.as_millis() as u64,
                        "Test RATE-LIMITED, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Classify one functional-test exchange.
    async fn interpret(
        &self,
        instance: &Instance,
        service: &str,
        outcome: Result<Exchange, ExchangeError>,
    ) -> Attempt {
        let exchange = match outcome {
            Ok(exchange) => exchange,
            Err(e) => return Attempt::Finished(TestResult::fail(service, e.to_string())),
        };
        let Some(body) = exchange.body.as_deref() else {
            return Attempt::Finished(TestResult::fail(
                service,
                format!("No content returned from API (HTTP {})", exchange.status),
            ));
        };
        let json: Value = match serde_json::from_str(body) {
            Ok(json) => json,
            Err(e) => {
                return Attempt::Finished(TestResult::fail(
                    service,
                    format!("Response is not valid JSON: {e}"),
                ))
            }
        };
        let status = json
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");

        if exchange.status != 200 {
            let message = error_message(&json);
            if status.eq_ignore_ascii_case("rate-limit") || message.contains("rate_exceeded") {
                return Attempt::RateLimited(message);
            }
            return Attempt::Finished(TestResult::fail(service, message));
        }

        let Ok(parsed) = status.parse::<ResponseStatus>() else {
            return Attempt::Finished(TestResult::fail(
                service,
                format!("Invalid status ({status})"),
            ));
        };

        let result = match parsed {
            ResponseStatus::Tunnel | ResponseStatus::Stream => {
                match json.get("url").and_then(Value::as_str) {
                    Some(url) => self.check_tunnel(instance, service, url).await,
                    None => TestResult::fail(service, format!("Status {parsed} without a media url")),
                }
            }
            ResponseStatus::LocalProcessing => {
                let first = json
                    .get("tunnel")
                    .and_then(Value::as_array)
                    .and_then(|links| links.first())
                    .and_then(Value::as_str);
                match first {
                    Some(url) => self.check_tunnel(instance, service, url).await,
                    None => TestResult::fail(
                        service,
                        "Forced local-processing, but no tunnel links returned",
                    ),
                }
            }
            ResponseStatus::Picker => {
                let items = json
                    .get("picker")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                TestResult::pass(
                    service,
                    format!("Working, returned valid status (picker with {items} items)"),
                )
            }
            other => TestResult::pass(service, format!("Working, returned valid status ({other})")),
        };
        Attempt::Finished(result)
    }

    /// HEAD the tunnel, rewritten onto the instance, and judge its length.
    async fn check_tunnel(&self, instance: &Instance, service: &str, url: &str) -> TestResult {
        let scheme = instance.protocol().to_string();
        let tunnel_url = rewrite_tunnel_url(url, &scheme, instance.api(), &self.ctx.checks);
        match self.ctx.http.head(&tunnel_url).await {
            Ok(exchange) => judge_length(service, read_length(&exchange.headers), &self.ctx.checks),
            Err(e) => TestResult::fail(service, format!("Tunnel check failed: {e}")),
        }
    }
}

/// Functional endpoint for the instance's detected variant.
pub fn api_endpoint(instance: &Instance) -> String {
    if instance.probe_state().is_new_variant() {
        instance.base_url()
    } else {
        format!("{}{}", instance.base_url(), LEGACY_API_PATH)
    }
}

fn html_tags() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"))
}

/// Error text from either error shape, with any HTML markup removed.
pub fn error_message(json: &Value) -> String {
    let raw = json
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .or_else(|| json.get("text").and_then(Value::as_str));
    match raw {
        Some(text) => html_tags().replace_all(text, "").trim().to_string(),
        None => "Unknown error, could not parse error from API".to_string(),
    }
}

/// Phase-two unit: one service test for one instance.
pub struct ServiceTest {
    pub runner: Arc<ServiceTestRunner>,
    pub instance: Arc<Instance>,
    pub service: String,
    pub target_url: String,
    pub api_key: Option<String>,
}

#[async_trait]
impl WorkUnit for ServiceTest {
    fn label(&self) -> String {
        format!("{}:{}", self.instance.api(), self.service)
    }

    async fn execute(&self) {
        self.runner
            .run(
                &self.instance,
                &self.service,
                &self.target_url,
                self.api_key.as_deref(),
            )
            .await;
    }
}

/// Build the phase-two units for every healthy instance.
///
/// Offline instances get nothing. Instances behind a bot challenge with no
/// API key get a failure recorded for each service directly, without a unit;
/// their front end is still checked.
pub fn plan_service_tests(
    runner: &Arc<ServiceTestRunner>,
    instances: &[Arc<Instance>],
    catalog: &ServiceCatalog,
    credentials: &Credentials,
) -> Vec<ServiceTest> {
    let mut units = Vec::new();
    for instance in instances {
        if !instance.is_api_healthy() {
            continue;
        }
        let api_key = credentials.get(instance.api()).map(str::to_string);
        if api_key.is_some() {
            info!(api = %instance.api(), "found API key, will use it for requests");
        }

        if instance.probe_state().has_challenge && api_key.is_none() {
            warn!(
                api = %instance.api(),
                services = catalog.len(),
                "skipping service tests, instance has a bot challenge and no API key"
            );
            for service in catalog.iter() {
                instance.add_result(TestResult::fail(&service.id, CHALLENGE_MESSAGE));
            }
        } else {
            for service in catalog.iter() {
                units.push(ServiceTest {
                    runner: Arc::clone(runner),
                    instance: Arc::clone(instance),
                    service: service.id.clone(),
                    target_url: service.test_url.clone(),
                    api_key: api_key.clone(),
                });
            }
        }

        if let Some(url) = instance.front_end_url() {
            units.push(ServiceTest {
                runner: Arc::clone(runner),
                instance: Arc::clone(instance),
                service: FRONTEND_SERVICE.to_string(),
                target_url: url,
                api_key: None,
            });
        }
    }
    units
}

//! Tunnel URL rewriting and media length verification.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::HeaderMap;

use crate::config::ChecksConfig;
use crate::instance::TestResult;

pub const CONTENT_LENGTH: &str = "content-length";
pub const ESTIMATED_LENGTH: &str = "estimated-content-length";

/// Reported sizes at or below this are not real media.
pub const MIN_MEDIA_BYTES: u64 = 1000;

fn tunnel_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(https?)://([^/]+)(/(?:tunnel|api/stream).*)$")
            .expect("tunnel pattern is valid")
    })
}

/// Point a tunnel URL at the probed instance itself.
///
/// Instances sometimes hand out tunnel links on another host; checking those
/// would validate a third party instead of the instance. URLs already on the
/// official operator domain and URLs that are not tunnel paths are returned
/// unchanged.
pub fn rewrite_tunnel_url(url: &str, scheme: &str, host: &str, checks: &ChecksConfig) -> String {
    if let Some(caps) = tunnel_pattern().captures(url) {
        if checks.is_official_host(&caps[2]) {
            return url.to_string();
        }
        return format!("{}://{}{}", scheme, host.trim_end_matches('/'), &caps[3]);
    }
    url.to_string()
}

/// Size advertised by a tunnel, and the header it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaLength {
    Reported { header: &'static str, size: u64 },
    Missing,
}

fn parse_length(headers: &HeaderMap, name: &'static str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Read the length headers, preferring the larger when both are valid.
pub fn read_length(headers: &HeaderMap) -> MediaLength {
    let content = parse_length(headers, CONTENT_LENGTH);
    let estimated = parse_length(headers, ESTIMATED_LENGTH);
    match (content, estimated) {
        (Some(c), Some(e)) if e > c => MediaLength::Reported {
            header: ESTIMATED_LENGTH,
            size: e,
        },
        (Some(c), _) => MediaLength::Reported {
            header: CONTENT_LENGTH,
            size: c,
        },
        (None, Some(e)) => MediaLength::Reported {
            header: ESTIMATED_LENGTH,
            size: e,
        },
        (None, None) => MediaLength::Missing,
    }
}

/// Turn a tunnel's advertised length into a test result.
pub fn judge_length(service: &str, length: MediaLength, checks: &ChecksConfig) -> TestResult {
    match length {
        MediaLength::Missing if checks.requires_length_header(service) => TestResult::fail(
            service,
            "Not working, tunnel did not respond with a length header",
        ),
        MediaLength::Missing => TestResult::pass(
            service,
            "Working, returned valid status, but no length header to verify",
        ),
        MediaLength::Reported { header, size: 0 } => {
            TestResult::fail(service, format!("Not working, {header} length is zero"))
        }
        MediaLength::Reported { header, size } if size <= MIN_MEDIA_BYTES => TestResult::fail(
            service,
            format!("Not working, {header} is too small to be real media ({size})"),
        ),
        MediaLength::Reported { header, .. } => TestResult::pass(
            service,
            format!("Working, returned valid status, and has valid {header} header"),
        ),
    }
}

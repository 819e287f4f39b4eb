//! Front-end page check.

use std::sync::OnceLock;

use regex::Regex;

use crate::http::HttpClient;
use crate::instance::{TestResult, FRONTEND_SERVICE};

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?i)<meta\s+(?:[^>]*?\s)?name=["']application-name["']\s+(?:[^>]*?\s)?content=["']([^"']*)["'][^>]*>"#,
        )
        .expect("application-name pattern is valid")
    })
}

/// The `application-name` a page declares, if any.
pub fn application_name(html: &str) -> Option<&str> {
    marker_pattern()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// GET the front end and check it identifies as the expected application.
pub async fn check(http: &HttpClient, url: &str, expected: &str) -> TestResult {
    let exchange = match http.get(url).await {
        Ok(exchange) => exchange,
        Err(e) => return TestResult::fail(FRONTEND_SERVICE, e.to_string()),
    };
    if exchange.status != 200 {
        return TestResult::fail(
            FRONTEND_SERVICE,
            format!("Returned non HTTP 200 code: {}", exchange.status),
        );
    }
    match exchange.body.as_deref().and_then(application_name) {
        Some(name) if name.eq_ignore_ascii_case(expected) => {
            TestResult::pass(FRONTEND_SERVICE, "Working")
        }
        Some(name) => TestResult::fail(
            FRONTEND_SERVICE,
            format!("Page identifies as `{name}`, not `{expected}`"),
        ),
        None => TestResult::fail(FRONTEND_SERVICE, "Page has no application-name marker"),
    }
}

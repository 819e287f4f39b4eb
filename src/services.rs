//! Catalog of supported services and their canonical test content.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::FleetConfig;
use crate::http::HttpClient;

/// Service whose test links expire and are rediscovered on every run.
pub const XIAOHONGSHU: &str = "xiaohongshu";

fn explore_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/explore/[a-f0-9]{24}\?xsec_token=[^&]+(?:&amp;|&)xsec_source=")
            .expect("explore link pattern is valid")
    })
}

/// Find a fresh post link on the Xiaohongshu explore feed.
///
/// Returns `None` when the feed cannot be fetched or lists no post link.
pub async fn discover_xiaohongshu_url(scraper: &HttpClient, explore_url: &str) -> Option<String> {
    let exchange = match scraper.get(explore_url).await {
        Ok(exchange) => exchange,
        Err(e) => {
            warn!(url = %explore_url, error = %e, "failed to load explore feed");
            return None;
        }
    };
    if exchange.status != 200 {
        warn!(url = %explore_url, status = exchange.status, "explore feed returned non-200");
        return None;
    }
    let body = exchange.body?;
    let link = explore_link_pattern()
        .find(&body)?
        .as_str()
        .replace("&amp;", "&");
    let origin = Url::parse(explore_url).ok()?.origin().ascii_serialization();
    Some(format!("{origin}{link}"))
}

/// A content-source family and a URL known to be fetchable through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDefinition {
    /// Slug used as the result key.
    pub id: String,
    /// Display name as written in the tests file.
    pub name: String,
    pub test_url: String,
}

/// Lowercase, spaces become dashes.
pub fn slugify(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

/// Immutable set of services tested in a run, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: Vec<ServiceDefinition>,
}

impl ServiceCatalog {
    /// Build from `display name -> test url` pairs.
    pub fn from_map<I, K, V>(tests: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut by_id = BTreeMap::new();
        for (name, url) in tests {
            let name = name.into();
            let id = slugify(&name);
            by_id.insert(
                id.clone(),
                ServiceDefinition {
                    id,
                    name,
                    test_url: url.into(),
                },
            );
        }
        Self {
            services: by_id.into_values().collect(),
        }
    }

    /// Load the tests file: a JSON object of service name to test URL.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tests file: {}", path.display()))?;
        let tests: BTreeMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse tests file: {}", path.display()))?;
        if tests.is_empty() {
            anyhow::bail!("tests file {} defines no services", path.display());
        }
        let catalog = Self::from_map(tests);
        for service in catalog.iter() {
            info!(service = %service.id, url = %service.test_url, "importing test");
        }
        Ok(catalog)
    }

    /// Load the tests file, then replace expiring test links with fresh ones.
    pub async fn import(path: &Path, config: &FleetConfig) -> Result<Self> {
        let mut catalog = Self::load(path)?;
        if catalog.get(XIAOHONGSHU).is_some() {
            let scraper = HttpClient::scraper(&config.http, &config.discovery.browser_user_agent)
                .context("failed to build scrape client")?;
            catalog
                .refresh_xiaohongshu(&scraper, &config.discovery.xiaohongshu_explore_url)
                .await;
        }
        Ok(catalog)
    }

    /// Swap the Xiaohongshu test link for a freshly discovered one. The link
    /// from the tests file stays when discovery fails. Returns whether the
    /// link was replaced.
    pub async fn refresh_xiaohongshu(&mut self, scraper: &HttpClient, explore_url: &str) -> bool {
        let Some(service) = self.services.iter_mut().find(|s| s.id == XIAOHONGSHU) else {
            return false;
        };
        info!("generating Xiaohongshu test link");
        match discover_xiaohongshu_url(scraper, explore_url).await {
            Some(url) => {
                info!(%url, "found valid Xiaohongshu link");
                service.test_url = url;
                true
            }
            None => {
                warn!(
                    url = %service.test_url,
                    "unable to dynamically get Xiaohongshu link, using the one from the tests file"
                );
                false
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.iter()
    }

    pub fn get(&self, id: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

//! HTTP exchanges against instance-controlled hosts.
//!
//! Every request in a run goes through one [`HttpClient`], built once from
//! [`HttpConfig`]. Responses are reduced to an [`Exchange`] that the caller
//! interprets immediately; nothing here decides pass or fail.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::config::HttpConfig;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid proxy {proxy}: {source}")]
    Proxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ExchangeError {
    fn classify(url: &str, source: reqwest::Error) -> Self {
        let url = url.to_string();
        if source.is_timeout() {
            ExchangeError::Timeout { url }
        } else if source.is_connect() {
            ExchangeError::Connect { url, source }
        } else {
            ExchangeError::Request { url, source }
        }
    }
}

/// One completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: u16,
    pub headers: HeaderMap,
    /// Response body, `None` when the server sent nothing.
    pub body: Option<String>,
}

impl Exchange {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Shared HTTP client with the run's user agent and timeouts.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Client for instance traffic. Always connects directly.
    pub fn new(config: &HttpConfig) -> Result<Self, ExchangeError> {
        Self::build(config, &config.user_agent, None)
    }

    /// Client for third-party pages, sent with `user_agent` and through the
    /// configured proxy when there is one.
    pub fn scraper(config: &HttpConfig, user_agent: &str) -> Result<Self, ExchangeError> {
        Self::build(config, user_agent, config.proxy.as_deref())
    }

    fn build(
        config: &HttpConfig,
        user_agent: &str,
        proxy: Option<&str>,
    ) -> Result<Self, ExchangeError> {
        let mut builder = Client::builder()
            .user_agent(user_agent.to_string())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(proxy) = proxy {
            let p = reqwest::Proxy::all(proxy).map_err(|source| ExchangeError::Proxy {
                proxy: proxy.to_string(),
                source,
            })?;
            builder = builder.proxy(p);
        }

        let client = builder.build().map_err(ExchangeError::Client)?;
        Ok(Self { client })
    }

    /// Existence check; the body is never read.
    pub async fn head(&self, url: &str) -> Result<Exchange, ExchangeError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ExchangeError::classify(url, e))?;
        Ok(Exchange {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            body: None,
        })
    }

    /// Plain GET, used for front-end pages.
    pub async fn get(&self, url: &str) -> Result<Exchange, ExchangeError> {
        let request = self.client.get(url);
        self.finish(url, request).await
    }

    /// GET asking for JSON.
    pub async fn get_json(&self, url: &str) -> Result<Exchange, ExchangeError> {
        let request = self.client.get(url).header(ACCEPT, "application/json");
        self.finish(url, request).await
    }

    /// POST a JSON body, optionally authenticated with an instance API key.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        api_key: Option<&str>,
    ) -> Result<Exchange, ExchangeError> {
        let mut request = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(body);
        if let Some(key) = api_key {
            request = request.header(AUTHORIZATION, format!("Api-Key {key}"));
        }
        self.finish(url, request).await
    }

    async fn finish(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Exchange, ExchangeError> {
        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::classify(url, e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::classify(url, e))?;
        let body = if text.trim().is_empty() { None } else { Some(text) };
        Ok(Exchange {
            status,
            headers,
            body,
        })
    }
}

//! Transport layer for catalog requests
//!
//! [`CatalogTransport`] is the seam between the resilience stack and the
//! network. [`HttpTransport`] talks to the real JSON API over `reqwest`;
//! tests substitute scripted transports.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder, Response, StatusCode, header::RETRY_AFTER};
use std::time::Duration;
use tracing::trace;
use url::Url;

use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::query::CatalogRequest;

/// Performs one upstream request
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    /// Fetch the raw response body for `request`
    ///
    /// Implementations map failures onto the catalog error taxonomy:
    /// 404 is `NotFound`, other error statuses are `UpstreamRejected`,
    /// connection problems are `NetworkTransport`.
    async fn fetch(&self, request: &CatalogRequest) -> Result<Bytes>;
}

/// HTTP transport for the catalog JSON API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    language: Option<String>,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from client configuration
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        // reqwest is built without a default crypto provider
        let _ = rustls::crypto::ring::default_provider().install_default();

        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent(concat!("marquee/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.api_base_url)?,
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            request_timeout: config.request_timeout,
        })
    }

    /// Absolute URL for `request`, including credentials and language
    pub fn url_for(&self, request: &CatalogRequest) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                CatalogError::InvalidConfiguration(format!(
                    "API base URL cannot have a path: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(request.path.split('/').filter(|segment| !segment.is_empty()));

        {
            let mut query = url.query_pairs_mut();
            if let Some(api_key) = &self.api_key {
                query.append_pair("api_key", api_key);
            }
            if let Some(language) = &self.language {
                query.append_pair("language", language);
            }
            for (name, value) in &request.params {
                query.append_pair(name, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    fn map_send_error(&self, error: reqwest::Error) -> CatalogError {
        if error.is_timeout() {
            CatalogError::Timeout(self.request_timeout)
        } else {
            error.into()
        }
    }
}

#[async_trait]
impl CatalogTransport for HttpTransport {
    async fn fetch(&self, request: &CatalogRequest) -> Result<Bytes> {
        let url = self.url_for(request)?;
        trace!("GET {}", request.path);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = check_status(response, &request.path)?;
        response.bytes().await.map_err(|e| self.map_send_error(e))
    }
}

fn check_status(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(CatalogError::NotFound(path.to_string()));
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    Err(CatalogError::UpstreamRejected {
        status: status.as_u16(),
        retry_after,
    })
}

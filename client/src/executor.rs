//! reqwest-backed request executor

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use loadgen_core::{elapsed_ms, Method, Request, RequestExecutor, RequestOutcome, SetupError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};

use crate::config::HttpConfig;

/// Sends requests to one target host over a shared connection pool
///
/// Cloning is cheap and clones share the pool.
///
/// # Example
///
/// ```rust,ignore
/// let executor = HttpExecutor::new("http://localhost:5115", &HttpConfig::default())?;
/// let outcome = executor.execute(&Request::post("/chromadb/add").param("text", "hi")).await;
/// ```
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
    config: HttpConfig,
}

impl HttpExecutor {
    /// Create an executor for `host`
    ///
    /// # Errors
    ///
    /// [`SetupError::InvalidTarget`] if `host` is not an absolute `http` or
    /// `https` URL, [`SetupError::InvalidOption`] if the client cannot be built.
    pub fn new(host: &str, config: &HttpConfig) -> Result<Self, SetupError> {
        let invalid = |detail: String| SetupError::InvalidTarget {
            host: host.to_string(),
            detail,
        };

        let url = Url::parse(host.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("host must not carry a query or fragment".to_string()));
        }

        let redirects = if config.follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };
        let client = Client::builder()
            .pool_idle_timeout(config.idle_timeout())
            .pool_max_idle_per_host(config.max_idle_connections)
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .redirect(redirects)
            .user_agent(&config.user_agent)
            .default_headers(header_map(&config.headers)?)
            .build()
            .map_err(|e| SetupError::InvalidOption {
                option: "http client",
                detail: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: url.as_str().trim_end_matches('/').to_string(),
            config: config.clone(),
        })
    }

    /// Base URL every request path is appended to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Configuration used to build the client
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub(crate) fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, SetupError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = |detail: String| SetupError::InvalidOption {
            option: "http headers",
            detail: format!("{name}: {detail}"),
        };
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "timeout".to_string()
    } else if err.is_connect() {
        format!("connection error: {err}")
    } else {
        err.to_string()
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, request: &Request) -> RequestOutcome {
        let url = self.url_for(&request.path);
        let builder = self
            .client
            .request(to_reqwest(request.method), &url)
            .query(&request.params);

        let start = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "Request failed before a response");
                return RequestOutcome::transport_error(describe(&e), elapsed_ms(start));
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => RequestOutcome::response(status, body.len(), elapsed_ms(start)),
            // Without the full body the exchange never completed.
            Err(e) => RequestOutcome::transport_error(describe(&e), elapsed_ms(start)),
        }
    }
}

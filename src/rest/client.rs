//! Outbound HTTP transport.
//!
//! The engine renders a [`RestInput`] and hands it to a [`RestClient`];
//! this module provides the reqwest-backed implementation plus the URL
//! construction shared with tests. Named client profiles let a rule pick
//! a differently-configured transport (timeouts, proxies, middleware).

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::TransportError;
use crate::rest::input::{HttpMethod, RestInput};

/// Outcome of one outbound call: status code plus the reason phrase, when
/// the server sent one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub status: u16,
    pub reason: Option<String>,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Human-readable failure reason for reporting.
    pub fn failure_reason(&self) -> String {
        match self.reason.as_deref() {
            Some(reason) if !reason.is_empty() => reason.to_string(),
            _ => format!("HTTP status {}", self.status),
        }
    }
}

/// One outbound HTTP call. Implementations map wire-level failures into
/// [`TransportError`]; the processing loop converts both error cases and
/// non-2xx responses into per-message failures.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn invoke(&self, input: &RestInput) -> Result<RestResponse, TransportError>;
}

/// Build the request URL from the descriptor: endpoint, then the service
/// path segment, then the percent-encoded query string.
pub fn build_url(input: &RestInput) -> Result<Url, TransportError> {
    let endpoint = input
        .endpoint
        .as_deref()
        .ok_or(TransportError::MissingEndpoint)?;
    let mut url = Url::parse(endpoint).map_err(|e| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    if let Some(service) = input.service.as_deref()
        && !service.is_empty()
    {
        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "endpoint cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .push(service);
    }

    if let Some(query) = input.query_string.as_deref()
        && !query.is_empty()
    {
        url.set_query(Some(&escape_query(query)));
    }

    Ok(url)
}

/// Percent-encode a `k=v&k=v` query string. Pairs that do not split into
/// exactly key and value are passed through untouched.
fn escape_query(query: &str) -> String {
    query
        .split('&')
        .map(|pair| {
            let parts: Vec<&str> = pair.split('=').collect();
            if parts.len() != 2 {
                return pair.to_string();
            }
            let key: String = url::form_urlencoded::byte_serialize(parts[0].as_bytes()).collect();
            let value: String =
                url::form_urlencoded::byte_serialize(parts[1].as_bytes()).collect();
            format!("{key}={value}")
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// reqwest-backed client with optional named profiles.
pub struct HttpRestClient {
    default: reqwest::Client,
    profiles: HashMap<String, reqwest::Client>,
}

impl HttpRestClient {
    pub fn new() -> Self {
        Self {
            default: reqwest::Client::new(),
            profiles: HashMap::new(),
        }
    }

    /// Register a named client profile selectable via
    /// `RestInput::http_client_name`.
    pub fn with_profile(mut self, name: impl Into<String>, client: reqwest::Client) -> Self {
        self.profiles.insert(name.into(), client);
        self
    }

    fn client_for(&self, name: Option<&str>) -> &reqwest::Client {
        name.and_then(|n| self.profiles.get(n)).unwrap_or(&self.default)
    }
}

impl Default for HttpRestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn invoke(&self, input: &RestInput) -> Result<RestResponse, TransportError> {
        let url = build_url(input)?;
        let client = self.client_for(input.http_client_name.as_deref());

        let method = match input.http_method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Trace => reqwest::Method::TRACE,
        };

        debug!(method = %input.http_method, url = %url, "Invoking REST service");

        let mut request = client.request(method, url);
        if let Some(token) = input.api_token.as_deref()
            && !token.is_empty()
        {
            request = request.bearer_auth(token);
        }
        if input.http_method == HttpMethod::Post {
            request = request.body(input.content.clone().unwrap_or_default());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        Ok(RestResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(|r| r.to_string()),
        })
    }
}

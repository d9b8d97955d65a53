//! Replays relayed requests against the local HTTP service

use minitunnel_proto::{HeaderMultimap, TunneledRequest, TunneledResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use reqwest::Method;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Request headers that the client computes itself
const SKIPPED_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding", "trailer"];

/// Errors that can occur while talking to the local service
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Invalid request method '{0}'")]
    InvalidMethod(String),

    #[error("{0}")]
    Request(#[from] reqwest::Error),
}

/// HTTP client bound to one local service address
#[derive(Debug, Clone)]
pub struct LocalForwarder {
    client: reqwest::Client,
    local_addr: String,
}

impl LocalForwarder {
    pub fn new(local_addr: impl Into<String>, timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ForwardError::ClientBuild)?;

        Ok(Self {
            client,
            local_addr: local_addr.into(),
        })
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Forward a request, turning any failure into a 502 response
    pub async fn forward(&self, request: TunneledRequest) -> TunneledResponse {
        match self.try_forward(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Local request failed: {}", e);
                TunneledResponse::bad_gateway(format!("Error: {}", e))
            }
        }
    }

    /// Forward a request to `http://<local_addr><path>`
    ///
    /// Headers are copied except those describing the relayed message itself.
    /// `Host` is set to the local address.
    pub async fn try_forward(
        &self,
        request: TunneledRequest,
    ) -> Result<TunneledResponse, ForwardError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ForwardError::InvalidMethod(request.method.clone()))?;
        let url = format!("http://{}{}", self.local_addr, request.path);

        let mut builder = self
            .client
            .request(method, url)
            .headers(outgoing_headers(&request.headers))
            .header(HOST, self.local_addr.as_str());
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;

        let status_code = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?.to_vec();

        Ok(TunneledResponse {
            status_code,
            headers,
            body,
        })
    }
}

fn outgoing_headers(headers: &HeaderMultimap) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        if SKIPPED_HEADERS
            .iter()
            .any(|skipped| name.eq_ignore_ascii_case(skipped))
        {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("Dropping invalid header name {:?}", name);
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.append(name.clone(), value);
            }
        }
    }
    map
}

fn collect_headers(headers: &HeaderMap) -> HeaderMultimap {
    let mut collected = HeaderMultimap::new();
    for (name, value) in headers {
        collected
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    collected
}

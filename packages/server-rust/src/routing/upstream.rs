//! Outbound HTTP to service instances.
//!
//! [`Upstream`] is the seam between the router and the network: the router
//! decides which instance to call, an `Upstream` performs one attempt.
//! [`HttpUpstream`] is the production implementation on `reqwest`.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName};
use http::{Method, StatusCode};
use waypoint_core::InstanceAddress;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A buffered request to forward to one instance.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path (prefix already stripped) plus query string.
    pub path_and_query: String,
    /// End-to-end headers only; see [`strip_hop_by_hop`].
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A buffered upstream response, relayed to the client unchanged apart from
/// hop-by-hop headers.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A failed attempt. Every variant is retriable against another instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("connection to {address} failed: {reason}")]
    Connect {
        address: InstanceAddress,
        reason: String,
    },
    #[error("{address} did not respond in time")]
    Timeout { address: InstanceAddress },
    #[error("transport error talking to {address}: {reason}")]
    Transport {
        address: InstanceAddress,
        reason: String,
    },
}

impl UpstreamError {
    /// Label used for the attempt outcome metric.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Connect { .. } | Self::Transport { .. } => "error",
        }
    }
}

/// Performs a single attempt against one instance.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Sends `request` to `address`.
    ///
    /// # Errors
    ///
    /// Returns an [`UpstreamError`] when no HTTP response was obtained. An
    /// HTTP error status is a successful attempt.
    async fn send(
        &self,
        address: &InstanceAddress,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse, UpstreamError>;
}

// ---------------------------------------------------------------------------
// Hop-by-hop headers
// ---------------------------------------------------------------------------

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Removes connection-scoped headers, including any named in `Connection`,
/// plus `Host` (the upstream client sets its own) and `Content-Length`
/// (recomputed from the buffered body).
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
}

// ---------------------------------------------------------------------------
// HttpUpstream
// ---------------------------------------------------------------------------

/// `reqwest`-backed [`Upstream`] with a shared connection pool.
///
/// Redirects are relayed to the caller, not followed. The per-attempt
/// deadline is applied by the router.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(
        &self,
        address: &InstanceAddress,
        request: &ProxyRequest,
    ) -> Result<ProxyResponse, UpstreamError> {
        let url = format!("{}{}", address.base_url(), request.path_and_query);
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(address, &e))?;
        let status = response.status();
        let mut headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(address, &e))?;

        strip_hop_by_hop(&mut headers);
        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(address: &InstanceAddress, err: &reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout {
            address: address.clone(),
        }
    } else if err.is_connect() {
        UpstreamError::Connect {
            address: address.clone(),
            reason: err.to_string(),
        }
    } else {
        UpstreamError::Transport {
            address: address.clone(),
            reason: err.to_string(),
        }
    }
}

// src/proxy/backend.rs
use super::proxy::{build_client, HttpsClient, ProxyError, ReverseProxy};
use async_trait::async_trait;
use hyper::{Body, Request, Response};
use std::time::Duration;
use url::Url;

/// One upstream target the balancer can hand a request to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Address exactly as configured.
    fn address(&self) -> &str;

    fn is_alive(&self) -> bool;

    /// Relays one request/response cycle to this upstream.
    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid backend address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme {scheme:?} in backend address {address:?}")]
    UnsupportedScheme { address: String, scheme: String },

    #[error("backend address {address:?} cannot be proxied to: {source}")]
    Proxy {
        address: String,
        #[source]
        source: ProxyError,
    },
}

/// Reverse-proxy backend. Liveness is a static signal: always up.
pub struct ProxyBackend {
    address: String,
    proxy: ReverseProxy,
}

impl ProxyBackend {
    pub fn new(address: &str) -> Result<Self, BackendError> {
        Self::with_client(address, build_client(), None)
    }

    pub fn with_client(
        address: &str,
        client: HttpsClient,
        timeout: Option<Duration>,
    ) -> Result<Self, BackendError> {
        let target = parse_address(address)?;
        let proxy = ReverseProxy::new(target, client, timeout).map_err(|source| BackendError::Proxy {
            address: address.to_string(),
            source,
        })?;

        Ok(Self {
            address: address.to_string(),
            proxy,
        })
    }

    pub fn target(&self) -> &Url {
        self.proxy.target()
    }
}

#[async_trait]
impl Backend for ProxyBackend {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        self.proxy.forward(req).await
    }
}

impl std::fmt::Debug for ProxyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyBackend")
            .field("address", &self.address)
            .finish()
    }
}

fn parse_address(address: &str) -> Result<Url, BackendError> {
    let url = Url::parse(address).map_err(|source| BackendError::InvalidAddress {
        address: address.to_string(),
        source,
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(BackendError::UnsupportedScheme {
            address: address.to_string(),
            scheme: url.scheme().to_string(),
        });
    }

    Ok(url)
}

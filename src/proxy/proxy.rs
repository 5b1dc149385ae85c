// ────────────────────────────────
// src/proxy/proxy.rs
// Single-host reverse proxy: rewrites one request for a fixed target
// and relays the upstream response.
// ────────────────────────────────

use hyper::client::HttpConnector;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Client, Request, Response, StatusCode, Uri, Version};
use hyper_tls::HttpsConnector;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use url::Url;

pub type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Builds the pooled client shared by every backend's proxy handle.
pub fn build_client() -> HttpsClient {
    Client::builder().build::<_, Body>(HttpsConnector::new())
}

/// Peer address of the inbound connection, stored in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

pub struct ReverseProxy {
    target: Url,
    host: HeaderValue,
    client: HttpsClient,
    timeout: Option<Duration>,
}

impl ReverseProxy {
    pub fn new(target: Url, client: HttpsClient, timeout: Option<Duration>) -> Result<Self, ProxyError> {
        let host = HeaderValue::from_str(&authority(&target))
            .map_err(|e| ProxyError::InvalidUri(e.to_string()))?;

        Ok(Self {
            target,
            host,
            client,
            timeout,
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (mut parts, body) = req.into_parts();

        parts.uri = rewrite_uri(&self.target, &parts.uri)?;
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.insert(header::HOST, self.host.clone());
        if let Some(ClientAddr(peer)) = parts.extensions.get::<ClientAddr>().copied() {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }

        let outbound = Request::from_parts(parts, body);
        let pending = self.client.request(outbound);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| ProxyError::Timeout)??,
            None => pending.await?,
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body))
    }
}

fn authority(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Joins two path segments with exactly one slash between them.
pub(crate) fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Retargets `uri` at `target`. The inbound path is joined verbatim, never
/// normalized, so dot segments reach the upstream as the client sent them.
pub(crate) fn rewrite_uri(target: &Url, uri: &Uri) -> Result<Uri, ProxyError> {
    let path = join_paths(target.path(), uri.path());
    let query = match (target.query().filter(|q| !q.is_empty()), uri.query()) {
        (Some(base), Some(extra)) if !extra.is_empty() => Some(format!("{}&{}", base, extra)),
        (Some(base), _) => Some(base.to_string()),
        (None, extra) => extra.map(str::to_string),
    };
    let path_and_query = match query {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    Uri::builder()
        .scheme(target.scheme())
        .authority(authority(target).as_str())
        .path_and_query(path_and_query.as_str())
        .build()
        .map_err(|e| ProxyError::InvalidUri(e.to_string()))
}

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    // Upgrades are not proxied.
    headers.remove(header::UPGRADE);
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let mut chain: Vec<u8> = Vec::new();
    for value in headers.get_all(X_FORWARDED_FOR) {
        chain.extend_from_slice(value.as_bytes());
        chain.extend_from_slice(b", ");
    }
    chain.extend_from_slice(ip.to_string().as_bytes());

    if let Ok(value) = HeaderValue::from_bytes(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Upstream error: {0}")]
    Upstream(#[from] hyper::Error),

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Invalid upstream URI: {0}")]
    InvalidUri(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream(_) | ProxyError::InvalidUri(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoHealthyBackends => "unavailable",
            ProxyError::Upstream(_) => "upstream",
            ProxyError::Timeout => "timeout",
            ProxyError::InvalidUri(_) => "invalid_uri",
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let status = err.status();
        let message = match err {
            ProxyError::NoHealthyBackends => "No healthy backends available",
            ProxyError::Timeout => "Gateway timeout",
            ProxyError::Upstream(_) | ProxyError::InvalidUri(_) => "Bad gateway",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn joins_paths_with_single_slash() {
        assert_eq!(join_paths("/", "/x"), "/x");
        assert_eq!(join_paths("/api/", "/users"), "/api/users");
        assert_eq!(join_paths("/api", "/users"), "/api/users");
        assert_eq!(join_paths("/api", "users"), "/api/users");
        assert_eq!(join_paths("/api/", "users"), "/api/users");
    }

    #[test]
    fn rewrites_to_target_authority() {
        let uri: Uri = "/x?a=1".parse().unwrap();
        let rewritten = rewrite_uri(&url("https://www.bing.com"), &uri).unwrap();
        assert_eq!(rewritten.to_string(), "https://www.bing.com/x?a=1");
    }

    #[test]
    fn absolute_form_request_is_retargeted() {
        let uri: Uri = "http://balancer.local:8000/search?q=rust".parse().unwrap();
        let rewritten = rewrite_uri(&url("http://127.0.0.1:9001"), &uri).unwrap();
        assert_eq!(rewritten.to_string(), "http://127.0.0.1:9001/search?q=rust");
    }

    #[test]
    fn merges_target_path_and_query() {
        let uri: Uri = "/users?id=7".parse().unwrap();
        let target = url("http://127.0.0.1:9001/api?token=abc");
        let rewritten = rewrite_uri(&target, &uri).unwrap();
        assert_eq!(rewritten.path(), "/api/users");
        assert_eq!(rewritten.query(), Some("token=abc&id=7"));

        let bare: Uri = "/users".parse().unwrap();
        let rewritten = rewrite_uri(&target, &bare).unwrap();
        assert_eq!(rewritten.query(), Some("token=abc"));
    }

    #[test]
    fn dot_segments_are_forwarded_verbatim() {
        let target = url("http://127.0.0.1:9001");
        for path in ["/a/../b", "/a/./b", "/a/%2e%2e/b", "/static/%2E/x"] {
            let uri: Uri = path.parse().unwrap();
            let rewritten = rewrite_uri(&target, &uri).unwrap();
            assert_eq!(rewritten.path(), path);
        }
    }

    #[test]
    fn encoded_traversal_stays_under_base_path() {
        let uri: Uri = "/%2e%2e/admin?x=1".parse().unwrap();
        let rewritten = rewrite_uri(&url("http://127.0.0.1:9001/api"), &uri).unwrap();
        assert_eq!(rewritten.to_string(), "http://127.0.0.1:9001/api/%2e%2e/admin?x=1");
    }

    #[test]
    fn authority_keeps_explicit_port_only() {
        assert_eq!(authority(&url("http://127.0.0.1:9001")), "127.0.0.1:9001");
        assert_eq!(authority(&url("https://www.google.com")), "www.google.com");
        assert_eq!(authority(&url("https://www.google.com:443")), "www.google.com");
    }

    #[test]
    fn strips_hop_by_hop_and_connection_named_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert("x-test", HeaderValue::from_static("1"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-test").unwrap(), "1");
    }

    #[test]
    fn appends_client_ip_to_forwarded_chain() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "10.0.0.1");

        append_forwarded_for(&mut headers, "10.0.0.2".parse().unwrap());
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "10.0.0.1, 10.0.0.2");
    }

    #[test]
    fn keeps_opaque_forwarded_values() {
        let mut headers = HeaderMap::new();
        headers.append(X_FORWARDED_FOR, HeaderValue::from_bytes(b"proxy-\xe9").unwrap());
        headers.append(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));

        append_forwarded_for(&mut headers, "10.0.0.2".parse().unwrap());

        let values: Vec<&HeaderValue> = headers.get_all(X_FORWARDED_FOR).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].as_bytes(), b"proxy-\xe9, 10.0.0.1, 10.0.0.2");
    }

    #[test]
    fn errors_map_to_gateway_statuses() {
        let unavailable: Response<Body> = ProxyError::NoHealthyBackends.into();
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);

        let timeout: Response<Body> = ProxyError::Timeout.into();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let invalid: Response<Body> = ProxyError::InvalidUri("bad".into()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_GATEWAY);
    }
}

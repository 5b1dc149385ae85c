// src/proxy/mod.rs
mod backend;
#[allow(clippy::module_inception)]
mod proxy;

pub use backend::{Backend, BackendError, ProxyBackend};
pub use proxy::{build_client, ClientAddr, HttpsClient, ProxyError, ReverseProxy};

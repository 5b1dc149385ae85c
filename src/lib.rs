// src/lib.rs
pub mod config;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod server;

pub use load_balancer::{Balancer, BalancerError};
pub use proxy::{Backend, BackendError, ProxyBackend, ProxyError};

// src/load_balancer/mod.rs
mod balancer;
mod round_robin;

pub use balancer::{Balancer, BalancerError};
pub use round_robin::RoundRobinCursor;

// src/load_balancer/balancer.rs
use super::round_robin::RoundRobinCursor;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, ProxyError};
use hyper::{Body, Request, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    #[error("at least one backend is required")]
    NoBackends,
}

/// Hands each inbound request to the next live backend in list order.
pub struct Balancer {
    port: u16,
    backends: Vec<Box<dyn Backend>>,
    cursor: RoundRobinCursor,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Balancer {
    pub fn new(port: u16, backends: Vec<Box<dyn Backend>>) -> Result<Self, BalancerError> {
        if backends.is_empty() {
            return Err(BalancerError::NoBackends);
        }

        Ok(Self {
            port,
            backends,
            cursor: RoundRobinCursor::new(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        metrics.set_backend_count(self.backends.len());
        self.metrics = Some(metrics);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn cursor_position(&self) -> usize {
        self.cursor.position()
    }

    /// Picks the next live backend, scanning forward from the cursor.
    ///
    /// Dead backends are skipped and each skip advances the cursor, as does
    /// the selection itself. Gives up after one full cycle.
    pub fn select_next(&self) -> Result<&dyn Backend, ProxyError> {
        let len = self.backends.len();
        let start = self
            .cursor
            .next_index(len)
            .ok_or(ProxyError::NoHealthyBackends)?;

        for offset in 0..len {
            let backend = self.backends[(start + offset) % len].as_ref();
            if backend.is_alive() {
                self.cursor.skip(offset);
                return Ok(backend);
            }
            debug!(address = backend.address(), "skipping dead backend");
        }

        self.cursor.skip(len - 1);
        Err(ProxyError::NoHealthyBackends)
    }

    /// Forwards one request and always produces a response for the caller.
    pub async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
        let span = info_span!(
            "dispatch",
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );

        async move {
            let backend = match self.select_next() {
                Ok(backend) => backend,
                Err(err) => {
                    warn!(backends = self.backends.len(), "{}", err);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_unavailable();
                    }
                    return err.into();
                }
            };

            info!("forwarding request to addr {}", backend.address());
            let started = Instant::now();

            match backend.forward(req).await {
                Ok(response) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_request(
                            backend.address(),
                            response.status().as_u16(),
                            started.elapsed(),
                        );
                    }
                    response
                }
                Err(err) => {
                    error!(backend = backend.address(), %err, "upstream request failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_upstream_error(backend.address(), err.kind());
                    }
                    err.into()
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hyper::StatusCode;
    use std::collections::HashMap;

    struct StubBackend {
        address: String,
        alive: bool,
    }

    #[async_trait]
    impl Backend for StubBackend {
        fn address(&self) -> &str {
            &self.address
        }

        fn is_alive(&self) -> bool {
            self.alive
        }

        async fn forward(&self, _req: Request<Body>) -> Result<Response<Body>, ProxyError> {
            Ok(Response::new(Body::from(self.address.clone())))
        }
    }

    fn stub(address: &str, alive: bool) -> Box<dyn Backend> {
        Box::new(StubBackend {
            address: address.to_string(),
            alive,
        })
    }

    fn balancer(layout: &[(&str, bool)]) -> Balancer {
        let backends = layout.iter().map(|(a, alive)| stub(a, *alive)).collect();
        Balancer::new(8000, backends).unwrap()
    }

    fn picks(balancer: &Balancer, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| balancer.select_next().unwrap().address().to_string())
            .collect()
    }

    #[test]
    fn rejects_empty_backend_list() {
        let err = Balancer::new(8000, Vec::new()).err().unwrap();
        assert!(matches!(err, BalancerError::NoBackends));
    }

    #[test]
    fn cycles_in_configured_order() {
        let lb = balancer(&[("a", true), ("b", true), ("c", true)]);
        assert_eq!(lb.backend_count(), 3);
        assert_eq!(picks(&lb, 7), vec!["a", "b", "c", "a", "b", "c", "a"]);
        assert_eq!(lb.cursor_position(), 7);
    }

    #[test]
    fn spreads_load_evenly() {
        let lb = balancer(&[("a", true), ("b", true), ("c", true)]);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for address in picks(&lb, 10) {
            *counts.entry(address).or_default() += 1;
        }

        for count in counts.values() {
            assert!(*count == 3 || *count == 4, "unbalanced: {:?}", counts);
        }
        assert_eq!(counts.values().sum::<usize>(), 10);
    }

    #[test]
    fn skips_dead_backend() {
        let lb = balancer(&[("a", false), ("b", true), ("c", true)]);
        assert_eq!(lb.select_next().unwrap().address(), "b");
        assert_eq!(lb.cursor_position(), 2);
        assert_eq!(picks(&lb, 3), vec!["c", "b", "c"]);
    }

    #[test]
    fn all_dead_fails_after_one_cycle() {
        let lb = balancer(&[("a", false), ("b", false), ("c", false)]);
        let err = lb.select_next().err().unwrap();
        assert!(matches!(err, ProxyError::NoHealthyBackends));
        assert_eq!(lb.cursor_position(), 3);
    }

    #[test]
    fn identical_sequences_are_deterministic() {
        let layout = [("a", true), ("b", false), ("c", true), ("d", true)];
        let first = balancer(&layout);
        let second = balancer(&layout);
        assert_eq!(picks(&first, 11), picks(&second, 11));
    }

    #[test]
    fn concurrent_selection_stays_fair() {
        let lb = balancer(&[("a", true), ("b", true), ("c", true), ("d", true)]);

        let counts = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| picks(&lb, 50)))
                .collect();

            let mut counts: HashMap<String, usize> = HashMap::new();
            for worker in workers {
                for address in worker.join().unwrap() {
                    *counts.entry(address).or_default() += 1;
                }
            }
            counts
        });

        assert_eq!(lb.cursor_position(), 400);
        assert!(counts.values().all(|count| *count == 100), "{:?}", counts);
    }

    #[tokio::test]
    async fn dispatch_relays_selected_backend_response() {
        let lb = balancer(&[("a", true), ("b", true)]);

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let response = lb.dispatch(Request::new(Body::empty())).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            bodies.push(String::from_utf8(body.to_vec()).unwrap());
        }

        assert_eq!(bodies, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn dispatch_with_no_live_backend_is_unavailable() {
        let registry = crate::metrics::MetricsRegistry::new().unwrap();
        let lb = balancer(&[("a", false)]).with_metrics(registry.collector());

        let response = lb.dispatch(Request::new(Body::empty())).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(registry.collector().unavailable_total.get(), 1);
    }
}

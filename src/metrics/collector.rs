// src/metrics/collector.rs
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Renders every registered metric in the text exposition format.
    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub upstream_errors_total: IntCounterVec,
    pub unavailable_total: IntCounter,
    pub backends_total: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Requests relayed, by backend and upstream status"),
            &["backend", "status_code"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Time until the upstream response head arrived",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let upstream_errors_total = IntCounterVec::new(
            Opts::new("lb_upstream_errors_total", "Forwarding failures by backend and kind"),
            &["backend", "kind"],
        )?;
        registry.register(Box::new(upstream_errors_total.clone()))?;

        let unavailable_total = IntCounter::new(
            "lb_unavailable_total",
            "Requests rejected because no backend was alive",
        )?;
        registry.register(Box::new(unavailable_total.clone()))?;

        let backends_total = IntGauge::new("lb_backends_total", "Configured backends")?;
        registry.register(Box::new(backends_total.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            upstream_errors_total,
            unavailable_total,
            backends_total,
        })
    }

    pub fn record_request(&self, backend: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[backend, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_upstream_error(&self, backend: &str, kind: &str) {
        self.upstream_errors_total
            .with_label_values(&[backend, kind])
            .inc();
    }

    pub fn record_unavailable(&self) {
        self.unavailable_total.inc();
    }

    pub fn set_backend_count(&self, total: usize) {
        self.backends_total.set(total as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_recorded_requests() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_request("http://127.0.0.1:9001", 200, Duration::from_millis(3));
        metrics.record_upstream_error("http://127.0.0.1:9002", "upstream");
        metrics.set_backend_count(2);

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains(r#"lb_requests_total{backend="http://127.0.0.1:9001",status_code="200"} 1"#));
        assert!(text.contains(r#"lb_upstream_errors_total{backend="http://127.0.0.1:9002",kind="upstream"} 1"#));
        assert!(text.contains("lb_backends_total 2"));
    }
}

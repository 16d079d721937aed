//! ---
//! hamq_section: "03-observability"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Metrics collection and export utilities."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Producer-side metrics: per-endpoint send outcomes and availability.
#[derive(Clone, Debug)]
pub struct DispatchMetrics {
    registry: SharedRegistry,
    sends_total: IntCounterVec,
    send_latency_seconds: HistogramVec,
    jobs_total: IntCounterVec,
    endpoint_available: IntGaugeVec,
}

impl DispatchMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let sends_total = IntCounterVec::new(
            Opts::new(
                "hamq_dispatch_sends_total",
                "Send attempts per endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;
        registry.register(Box::new(sends_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0005, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let send_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "hamq_dispatch_send_latency_seconds",
                "Duration of individual endpoint send attempts",
            )
            .buckets(buckets),
            &["endpoint"],
        )?;
        registry.register(Box::new(send_latency_seconds.clone()))?;

        let jobs_total = IntCounterVec::new(
            Opts::new(
                "hamq_dispatch_jobs_total",
                "Dispatched jobs by overall outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(jobs_total.clone()))?;

        let endpoint_available = IntGaugeVec::new(
            Opts::new(
                "hamq_endpoint_available",
                "Indicator (0/1) whether an endpoint is still considered available",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(endpoint_available.clone()))?;

        Ok(Self {
            registry,
            sends_total,
            send_latency_seconds,
            jobs_total,
            endpoint_available,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn observe_send(&self, endpoint: &str, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.sends_total
            .with_label_values(&[endpoint, outcome])
            .inc();
        self.send_latency_seconds
            .with_label_values(&[endpoint])
            .observe(duration.as_secs_f64());
    }

    pub fn record_job(&self, outcome: &str) {
        self.jobs_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_available(&self, endpoint: &str, available: bool) {
        self.endpoint_available
            .with_label_values(&[endpoint])
            .set(if available { 1 } else { 0 });
    }
}

/// Consumer-side metrics: delivery outcomes, ack failures and dedup size.
#[derive(Clone, Debug)]
pub struct ConsumerMetrics {
    registry: SharedRegistry,
    deliveries_total: IntCounterVec,
    ack_failures_total: IntCounterVec,
    dedup_entries: IntGauge,
}

impl ConsumerMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let deliveries_total = IntCounterVec::new(
            Opts::new(
                "hamq_consumer_deliveries_total",
                "Deliveries by endpoint and processing outcome",
            ),
            &["endpoint", "outcome"],
        )?;
        registry.register(Box::new(deliveries_total.clone()))?;

        let ack_failures_total = IntCounterVec::new(
            Opts::new(
                "hamq_consumer_ack_failures_total",
                "Deliveries that could not be settled on their endpoint",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(ack_failures_total.clone()))?;

        let dedup_entries = IntGauge::with_opts(Opts::new(
            "hamq_dedup_entries",
            "Correlation ids currently tracked as processed",
        ))?;
        registry.register(Box::new(dedup_entries.clone()))?;

        Ok(Self {
            registry,
            deliveries_total,
            ack_failures_total,
            dedup_entries,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_delivery(&self, endpoint: &str, outcome: &str) {
        self.deliveries_total
            .with_label_values(&[endpoint, outcome])
            .inc();
    }

    pub fn record_ack_failure(&self, endpoint: &str) {
        self.ack_failures_total.with_label_values(&[endpoint]).inc();
    }

    /// Count one newly tracked correlation id.
    pub fn inc_dedup_entries(&self) {
        self.dedup_entries.inc();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)?
            .get_metric()
            .iter()
            .find(|metric| {
                labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|label| label.get_name() == *key && label.get_value() == *value)
                })
            })
            .map(|metric| metric.get_counter().get_value())
    }

    #[test]
    fn dispatch_metrics_record_sends_and_availability() {
        let registry = new_registry();
        let metrics = DispatchMetrics::new(registry.clone()).expect("register");
        metrics.observe_send("primary", true, Duration::from_millis(2));
        metrics.observe_send("primary", false, Duration::from_millis(3));
        metrics.observe_send("primary", false, Duration::from_millis(3));
        metrics.set_available("primary", false);
        metrics.record_job("delivered");

        assert_eq!(
            counter_value(
                &registry,
                "hamq_dispatch_sends_total",
                &[("endpoint", "primary"), ("outcome", "failure")]
            ),
            Some(2.0)
        );
        let gauge = registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == "hamq_endpoint_available")
            .expect("gauge registered");
        assert_eq!(gauge.get_metric()[0].get_gauge().get_value(), 0.0);
    }

    #[test]
    fn consumer_metrics_register_once_per_registry() {
        let registry = new_registry();
        let metrics = ConsumerMetrics::new(registry.clone()).expect("register");
        metrics.record_delivery("secondary", "skipped");
        metrics.record_ack_failure("secondary");
        metrics.inc_dedup_entries();
        assert_eq!(
            counter_value(
                &registry,
                "hamq_consumer_deliveries_total",
                &[("endpoint", "secondary"), ("outcome", "skipped")]
            ),
            Some(1.0)
        );
        assert!(ConsumerMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn http_server_binds_ephemeral_port_and_shuts_down() {
        let registry = new_registry();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).expect("spawn");
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await.expect("shutdown");
    }
}

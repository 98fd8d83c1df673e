//! Logging and metrics setup, plus the metric names emitted by the event pipeline

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LoggingConfig, MetricsConfig, ObservabilityConfig};

/// Set once logging and metrics are installed
static OBSERVABILITY: OnceCell<()> = OnceCell::new();

/// Process-wide logging and metrics installation
#[derive(Debug)]
pub struct ObservabilitySystem;

impl ObservabilitySystem {
    /// Install the tracing subscriber and, if enabled, the Prometheus exporter.
    ///
    /// Fails when called twice in one process.
    pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
        OBSERVABILITY
            .set(())
            .map_err(|_| anyhow::anyhow!("Observability system already initialized"))?;

        Self::init_logging(&config.logging)?;

        if config.metrics.enabled {
            Self::init_metrics(&config.metrics)?;
        }

        info!("Observability system initialized");
        Ok(())
    }

    fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
        let level = parse_level(&config.level);

        let env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(env_filter);

        match config.format.to_lowercase().as_str() {
            "json" => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?,
            _ => registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?,
        }

        Ok(())
    }

    fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
        let bind_addr: SocketAddr = config.bind_address.parse()?;

        PrometheusBuilder::new()
            .with_http_listener(bind_addr)
            .install()?;

        info!("Prometheus metrics exporter listening on {}", bind_addr);
        Ok(())
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Event pipeline metrics
pub struct EventMetrics;

impl EventMetrics {
    /// Record one dispatch pass
    pub fn dispatched(entity_type: &str, source: &str, invoked: usize, failed: usize) {
        counter!("prisma_events_dispatch_total",
                "entity_type" => entity_type.to_string(),
                "source" => source.to_string())
            .increment(1);
        counter!("prisma_events_listener_invocations_total",
                "entity_type" => entity_type.to_string(),
                "source" => source.to_string())
            .increment(invoked as u64);
        if failed > 0 {
            counter!("prisma_events_listener_failures_total",
                    "entity_type" => entity_type.to_string(),
                    "source" => source.to_string())
                .increment(failed as u64);
        }
    }

    /// Record a publish attempt; `outcome` is `published`, `skipped` or `failed`
    pub fn publish(entity_type: &str, outcome: &str) {
        counter!("prisma_events_publish_total",
                "entity_type" => entity_type.to_string(),
                "outcome" => outcome.to_string())
            .increment(1);
    }

    /// Record an inbound broker message before deduplication
    pub fn remote_received(entity_type: &str) {
        counter!("prisma_events_remote_received_total",
                "entity_type" => entity_type.to_string())
            .increment(1);
    }

    /// Record an inbound message dropped as a copy of a local event
    pub fn loopback_dropped(entity_type: &str) {
        counter!("prisma_events_loopback_dropped_total",
                "entity_type" => entity_type.to_string())
            .increment(1);
    }

    /// Record an inbound payload that could not be parsed
    pub fn malformed_dropped() {
        counter!("prisma_events_malformed_dropped_total").increment(1);
    }

    /// Record the number of active broker subscriptions
    pub fn active_subscriptions(count: usize) {
        gauge!("prisma_events_active_subscriptions").set(count as f64);
    }

    /// Record a broker connection state change
    pub fn connection(client_id: &str, connected: bool) {
        gauge!("prisma_events_broker_connected", "client_id" => client_id.to_string())
            .set(if connected { 1.0 } else { 0.0 });
    }
}

/// Records elapsed seconds into a histogram when dropped
pub struct PerfTimer {
    start: Instant,
    metric_name: &'static str,
    labels: Vec<(&'static str, String)>,
}

impl PerfTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.labels.push((key, value.into()));
        self
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let labels: Vec<metrics::Label> = self
                .labels
                .iter()
                .map(|(k, v)| metrics::Label::new(*k, v.clone()))
                .collect();
            histogram!(self.metric_name, labels).record(self.start.elapsed().as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        EventMetrics::dispatched("user", "local", 2, 1);
        EventMetrics::publish("user", "skipped");
        EventMetrics::active_subscriptions(3);
    }

    #[tokio::test]
    async fn test_perf_timer() {
        let timer = PerfTimer::new("test_metric").with_label("entity_type", "user");

        assert_eq!(timer.metric_name, "test_metric");
        assert_eq!(timer.labels.len(), 1);

        drop(timer);
    }
}

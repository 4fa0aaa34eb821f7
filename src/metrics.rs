use anyhow::Result;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::thread;
use tracing::{error, info, warn};

/// Sink for transfer counters. Implementations must not block; nothing in
/// the pipeline depends on what they do with the numbers.
pub trait StatisticsCollector: Send + Sync {
    fn record_received_bytes(&self, bytes: usize);
    fn record_received_count(&self, txs: usize);
    fn record_sent_bytes(&self, bytes: usize);
}

/// Prometheus-backed counters, prefixed with `txsync_`.
#[derive(Clone)]
pub struct PrometheusStatistics {
    registry: Registry,
    received_bytes: IntCounter,
    received_txs: IntCounter,
    sent_bytes: IntCounter,
}

impl PrometheusStatistics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let received_bytes = IntCounter::new(
            "txsync_received_bytes_total",
            "Bytes of transaction batches received from peers",
        )?;
        let received_txs = IntCounter::new(
            "txsync_received_txs_total",
            "Transactions decoded from received batches",
        )?;
        let sent_bytes = IntCounter::new(
            "txsync_sent_bytes_total",
            "Bytes of transaction batches forwarded along the routing tree",
        )?;
        registry.register(Box::new(received_bytes.clone()))?;
        registry.register(Box::new(received_txs.clone()))?;
        registry.register(Box::new(sent_bytes.clone()))?;
        Ok(Self { registry, received_bytes, received_txs, sent_bytes })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes.get()
    }

    pub fn received_txs(&self) -> u64 {
        self.received_txs.get()
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.get()
    }
}

impl StatisticsCollector for PrometheusStatistics {
    fn record_received_bytes(&self, bytes: usize) {
        self.received_bytes.inc_by(bytes as u64);
    }

    fn record_received_count(&self, txs: usize) {
        self.received_txs.inc_by(txs as u64);
    }

    fn record_sent_bytes(&self, bytes: usize) {
        self.sent_bytes.inc_by(bytes as u64);
    }
}

/// Serves `registry` in the Prometheus text format on a background thread.
pub fn serve(bind: &str, registry: Registry) -> Result<()> {
    let server = tiny_http::Server::http(bind)
        .map_err(|e| anyhow::anyhow!("could not start metrics server on {bind}: {e}"))?;
    info!(%bind, "metrics server listening");

    thread::spawn(move || {
        let content_type = "Content-Type: text/plain; version=0.0.4; charset=utf-8"
            .parse::<tiny_http::Header>()
            .ok();
        for request in server.incoming_requests() {
            let mut buffer = vec![];
            let encoder = TextEncoder::new();
            let metric_families = registry.gather();
            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                error!(error = %e, "could not encode metrics");
                continue;
            }

            let mut response = tiny_http::Response::from_data(buffer);
            if let Some(header) = content_type.clone() {
                response = response.with_header(header);
            }
            if let Err(e) = request.respond(response) {
                warn!(error = %e, "failed to answer metrics request");
            }
        }
    });

    Ok(())
}

//! Prometheus metrics for the controller
//!
//! - `kanari_reconciliations_total{result}` - passes by outcome
//! - `kanari_reconciliation_duration_seconds{result}` - pass latency
//! - `kanari_canary_nodes{namespace,workload}` - nodes running a canary
//! - `kanari_cleanup_failures_total` - generations that could not be deleted

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    duration: HistogramVec,
    canary_nodes: IntGaugeVec,
    cleanup_failures: IntCounter,
}

/// Create a metrics registry with every controller metric registered
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    let registry = Registry::new();

    let reconciliations = IntCounterVec::new(
        Opts::new("kanari_reconciliations_total", "Reconciliation passes by result"),
        &["result"],
    )?;
    let duration = HistogramVec::new(
        HistogramOpts::new(
            "kanari_reconciliation_duration_seconds",
            "Duration of reconciliation passes",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["result"],
    )?;
    let canary_nodes = IntGaugeVec::new(
        Opts::new("kanari_canary_nodes", "Nodes selected for the in-flight canary"),
        &["namespace", "workload"],
    )?;
    let cleanup_failures = IntCounter::new(
        "kanari_cleanup_failures_total",
        "Superseded generations that failed to delete",
    )?;

    registry.register(Box::new(reconciliations.clone()))?;
    registry.register(Box::new(duration.clone()))?;
    registry.register(Box::new(canary_nodes.clone()))?;
    registry.register(Box::new(cleanup_failures.clone()))?;

    Ok(Arc::new(ControllerMetrics {
        registry,
        reconciliations,
        duration,
        canary_nodes,
        cleanup_failures,
    }))
}

impl ControllerMetrics {
    pub fn record_reconciliation_success(&self, duration_secs: f64) {
        self.record("success", duration_secs);
    }

    pub fn record_reconciliation_error(&self, duration_secs: f64) {
        self.record("error", duration_secs);
    }

    fn record(&self, result: &str, duration_secs: f64) {
        self.reconciliations.with_label_values(&[result]).inc();
        self.duration
            .with_label_values(&[result])
            .observe(duration_secs);
    }

    pub fn set_canary_nodes(&self, namespace: &str, workload: &str, nodes: usize) {
        self.canary_nodes
            .with_label_values(&[namespace, workload])
            .set(nodes as i64);
    }

    /// Drop the per-workload series of a deleted workload
    pub fn forget_workload(&self, namespace: &str, workload: &str) {
        // Absent series is fine: the workload may never have had a canary
        let _ = self.canary_nodes.remove_label_values(&[namespace, workload]);
    }

    pub fn record_cleanup_failures(&self, count: usize) {
        self.cleanup_failures.inc_by(count as u64);
    }

    /// Encode all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

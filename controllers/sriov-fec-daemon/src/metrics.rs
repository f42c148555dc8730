//! Prometheus metrics and probe endpoints.
//!
//! # Exported metrics
//! - `sriov_fec_reconcile_total{result}`: finished passes by result (`success`, `error`)
//! - `sriov_fec_reconcile_errors_total{class}`: failed passes by error class
//! - `sriov_fec_status_write_failures_total`: status writes that were dropped
//! - `sriov_fec_reconcile_duration_seconds`: pass duration
//!
//! `/healthz` always answers 200; `/readyz` answers 200 once the watcher has
//! finished its initial list.

use crate::error::{ControllerError, ErrorClass};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Daemon metrics, registered on their own registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_errors_total: IntCounterVec,
    status_write_failures_total: IntCounter,
    reconcile_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("sriov_fec_reconcile_total", "Reconciliation passes by result"),
            &["result"],
        )?;
        let reconcile_errors_total = IntCounterVec::new(
            Opts::new("sriov_fec_reconcile_errors_total", "Failed reconciliation passes by error class"),
            &["class"],
        )?;
        let status_write_failures_total = IntCounter::new(
            "sriov_fec_status_write_failures_total",
            "SriovFecNodeConfig status writes that failed and were dropped",
        )?;
        let reconcile_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("sriov_fec_reconcile_duration_seconds", "Reconciliation pass duration")
                .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(status_write_failures_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_errors_total,
            status_write_failures_total,
            reconcile_duration_seconds,
        })
    }

    /// Records a finished pass.
    pub fn observe_reconcile(&self, seconds: f64, error: Option<ErrorClass>) {
        self.reconcile_duration_seconds.observe(seconds);
        match error {
            None => self.reconcile_total.with_label_values(&["success"]).inc(),
            Some(class) => {
                self.reconcile_total.with_label_values(&["error"]).inc();
                self.reconcile_errors_total.with_label_values(&[class.as_str()]).inc();
            }
        }
    }

    pub fn status_write_failed(&self) {
        self.status_write_failures_total.inc();
    }

    pub fn status_write_failures(&self) -> u64 {
        self.status_write_failures_total.get()
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct ProbeState {
    metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
}

fn router(metrics: Arc<Metrics>, ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(ProbeState { metrics, ready })
}

async fn readyz(State(state): State<ProbeState>) -> (StatusCode, &'static str) {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for initial list")
    }
}

async fn metrics_handler(State(state): State<ProbeState>) -> (StatusCode, String) {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Serves the probe and metrics endpoints until the process exits.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>, ready: Arc<AtomicBool>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Probe and metrics server listening on {}", addr);

    axum::serve(listener, router(metrics, ready))
        .await
        .map_err(|e| ControllerError::Watch(format!("probe server error: {}", e)))
}

//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `capsule_ledger_operations_total{operation}` - Committed operations
//! - `capsule_ledger_failures_total{operation,kind}` - Failed operations by error kind
//! - `capsule_ledger_lock_wait_seconds` - Histogram of lock acquisition time
//! - `capsule_ledger_busy_retries_total` - Attempts that hit lock contention
//! - `capsule_ledger_units_sold_total` - Capsule units sold

use crate::error::ErrorKind;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed operations
    pub operations_total: IntCounterVec,

    /// Failed operations
    pub failures_total: IntCounterVec,

    /// Lock acquisition latency
    pub lock_wait: Histogram,

    /// Attempts that hit lock contention
    pub busy_total: IntCounter,

    /// Capsule units sold
    pub units_sold: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("capsule_ledger_operations_total", "Committed ledger operations"),
            &["operation"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new("capsule_ledger_failures_total", "Failed ledger operations"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let lock_wait = Histogram::with_opts(
            HistogramOpts::new(
                "capsule_ledger_lock_wait_seconds",
                "Histogram of entity lock acquisition time",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(lock_wait.clone()))?;

        let busy_total = IntCounter::new(
            "capsule_ledger_busy_retries_total",
            "Attempts that hit lock contention",
        )?;
        registry.register(Box::new(busy_total.clone()))?;

        let units_sold = IntCounter::new(
            "capsule_ledger_units_sold_total",
            "Capsule units sold",
        )?;
        registry.register(Box::new(units_sold.clone()))?;

        Ok(Self {
            operations_total,
            failures_total,
            lock_wait,
            busy_total,
            units_sold,
            registry,
        })
    }

    /// Record committed operation
    pub fn record_success(&self, operation: &str) {
        self.operations_total.with_label_values(&[operation]).inc();
    }

    /// Record failed operation
    pub fn record_failure(&self, operation: &str, kind: ErrorKind) {
        self.failures_total
            .with_label_values(&[operation, kind.as_str()])
            .inc();
    }

    /// Record lock acquisition time
    pub fn record_lock_wait(&self, seconds: f64) {
        self.lock_wait.observe(seconds);
    }

    /// Record lock contention
    pub fn record_busy(&self) {
        self.busy_total.inc();
    }

    /// Record units sold by a purchase
    pub fn record_units_sold(&self, units: u64) {
        self.units_sold.inc_by(units);
    }

    /// Text exposition of every metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

//! Metrics collection for observability
//!
//! Counters live on a private [`Registry`] so several simulations can run in
//! one process without clashing over metric names.
//!
//! # Metrics
//!
//! - `hub_ledger_operations_total` - User operations attempted
//! - `hub_ledger_operation_failures_total` - User operations that returned an error
//! - `hub_ledger_rollbacks_total` - Failed operations whose state was restored
//! - `hub_ledger_invariant_runs_total` - Invariant suite passes
//! - `hub_ledger_invariant_violations_total` - Individual invariant failures
//! - `hub_ledger_accruals_total` - Index accruals that advanced the index

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// User operations attempted
    pub operations_total: IntCounter,

    /// User operations that failed
    pub operation_failures_total: IntCounter,

    /// Rollbacks performed
    pub rollbacks_total: IntCounter,

    /// Invariant suite passes
    pub invariant_runs_total: IntCounter,

    /// Invariant failures
    pub invariant_violations_total: IntCounter,

    /// Index accruals
    pub accruals_total: IntCounter,

    /// Prometheus registry
    registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            operations_total: counter(
                "hub_ledger_operations_total",
                "User operations attempted",
            )?,
            operation_failures_total: counter(
                "hub_ledger_operation_failures_total",
                "User operations that returned an error",
            )?,
            rollbacks_total: counter(
                "hub_ledger_rollbacks_total",
                "Failed operations whose state was restored",
            )?,
            invariant_runs_total: counter(
                "hub_ledger_invariant_runs_total",
                "Invariant suite passes",
            )?,
            invariant_violations_total: counter(
                "hub_ledger_invariant_violations_total",
                "Individual invariant failures",
            )?,
            accruals_total: counter(
                "hub_ledger_accruals_total",
                "Index accruals that advanced the index",
            )?,
            registry,
        })
    }

    /// Record an attempted operation
    pub fn record_operation(&self) {
        self.operations_total.inc();
    }

    /// Record a failed operation and its rollback
    pub fn record_failure(&self, rolled_back: bool) {
        self.operation_failures_total.inc();
        if rolled_back {
            self.rollbacks_total.inc();
        }
    }

    /// Record one invariant pass and the number of failures it found
    pub fn record_invariant_run(&self, violations: usize) {
        self.invariant_runs_total.inc();
        self.invariant_violations_total.inc_by(violations as u64);
    }

    /// Record an accrual
    pub fn record_accrual(&self) {
        self.accruals_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("operations_total", &self.operations_total.get())
            .field("operation_failures_total", &self.operation_failures_total.get())
            .field("rollbacks_total", &self.rollbacks_total.get())
            .field("invariant_runs_total", &self.invariant_runs_total.get())
            .field("invariant_violations_total", &self.invariant_violations_total.get())
            .field("accruals_total", &self.accruals_total.get())
            .finish()
    }
}

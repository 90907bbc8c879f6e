//! Metrics collection for observability
//!
//! Prometheus metrics for the accounting engine.
//!
//! # Metrics
//!
//! - `wallet_credits_total` - Total wallet credits applied
//! - `wallet_debits_total` - Total wallet debits applied
//! - `wallet_insufficient_funds_total` - Debits rejected for lack of funds
//! - `wallet_system_operations_total` - System wallet operations applied
//! - `wallet_mutation_duration_seconds` - Histogram of mutation latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total credits applied
    pub credits_total: IntCounter,

    /// Total debits applied
    pub debits_total: IntCounter,

    /// Debits rejected with InsufficientFunds
    pub insufficient_funds_total: IntCounter,

    /// System wallet operations applied
    pub system_operations_total: IntCounter,

    /// Mutation latency histogram
    pub mutation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let credits_total = IntCounter::with_opts(Opts::new(
            "wallet_credits_total",
            "Total wallet credits applied",
        ))?;
        registry.register(Box::new(credits_total.clone()))?;

        let debits_total = IntCounter::with_opts(Opts::new(
            "wallet_debits_total",
            "Total wallet debits applied",
        ))?;
        registry.register(Box::new(debits_total.clone()))?;

        let insufficient_funds_total = IntCounter::with_opts(Opts::new(
            "wallet_insufficient_funds_total",
            "Debits rejected for lack of funds",
        ))?;
        registry.register(Box::new(insufficient_funds_total.clone()))?;

        let system_operations_total = IntCounter::with_opts(Opts::new(
            "wallet_system_operations_total",
            "System wallet operations applied",
        ))?;
        registry.register(Box::new(system_operations_total.clone()))?;

        let mutation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wallet_mutation_duration_seconds",
                "Histogram of mutation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(mutation_duration.clone()))?;

        Ok(Self {
            credits_total,
            debits_total,
            insufficient_funds_total,
            system_operations_total,
            mutation_duration,
            registry,
        })
    }

    /// Record a committed credit
    pub fn record_credit(&self) {
        self.credits_total.inc();
    }

    /// Record a committed debit
    pub fn record_debit(&self) {
        self.debits_total.inc();
    }

    /// Record a rejected debit
    pub fn record_insufficient_funds(&self) {
        self.insufficient_funds_total.inc();
    }

    /// Record a committed system operation
    pub fn record_system_operation(&self) {
        self.system_operations_total.inc();
    }

    /// Record mutation latency
    pub fn record_mutation_duration(&self, duration_seconds: f64) {
        self.mutation_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

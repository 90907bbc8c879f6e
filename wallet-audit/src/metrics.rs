//! Prometheus metrics for the audit subsystem

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

/// Audit metrics
pub struct Metrics {
    registry: Registry,

    /// Audit jobs processed successfully
    pub jobs_processed_total: IntCounter,
    /// Audit job attempts that failed
    pub jobs_failed_total: IntCounter,
    /// Jobs that exhausted their attempt budget
    pub jobs_exhausted_total: IntCounter,
    /// Findings recorded (new or re-detected)
    pub findings_total: IntCounter,
    /// Snapshots captured
    pub snapshots_total: IntCounter,
    /// Current queue depth
    pub queue_depth: IntGauge,
    /// Audit run duration (seconds)
    pub audit_duration: Histogram,
}

impl Metrics {
    /// Create metrics with their own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let jobs_processed_total = IntCounter::with_opts(Opts::new(
            "audit_jobs_processed_total",
            "Audit jobs processed successfully",
        ))?;
        let jobs_failed_total = IntCounter::with_opts(Opts::new(
            "audit_jobs_failed_total",
            "Audit job attempts that failed",
        ))?;
        let jobs_exhausted_total = IntCounter::with_opts(Opts::new(
            "audit_jobs_exhausted_total",
            "Jobs that exhausted their attempt budget",
        ))?;
        let findings_total = IntCounter::with_opts(Opts::new(
            "audit_findings_total",
            "Findings recorded",
        ))?;
        let snapshots_total = IntCounter::with_opts(Opts::new(
            "audit_snapshots_total",
            "Snapshots captured",
        ))?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "audit_queue_depth",
            "Current audit queue depth",
        ))?;
        let audit_duration = Histogram::with_opts(
            HistogramOpts::new("audit_duration_seconds", "Audit run duration")
                .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;

        registry.register(Box::new(jobs_processed_total.clone()))?;
        registry.register(Box::new(jobs_failed_total.clone()))?;
        registry.register(Box::new(jobs_exhausted_total.clone()))?;
        registry.register(Box::new(findings_total.clone()))?;
        registry.register(Box::new(snapshots_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(audit_duration.clone()))?;

        Ok(Self {
            registry,
            jobs_processed_total,
            jobs_failed_total,
            jobs_exhausted_total,
            findings_total,
            snapshots_total,
            queue_depth,
            audit_duration,
        })
    }

    /// The underlying registry, for exposition
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

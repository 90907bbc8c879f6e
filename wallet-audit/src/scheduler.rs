//! Background scheduling
//!
//! Three interval loops:
//! - snapshot sweep: captures a checksummed snapshot of every wallet once
//!   per interval (one snapshot per wallet per day; a re-run on the same
//!   day overwrites)
//! - periodic enqueue: one periodic audit job per wallet
//! - global enqueue: one full-system audit job
//!
//! The scheduler only enqueues and captures; workers do the actual
//! auditing.

use crate::{
    config::AuditConfig,
    error::Result,
    metrics::Metrics,
    queue::{default_priority, AuditQueue},
    snapshot::SnapshotStore,
    types::{AuditEntity, AuditType},
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Periodic driver for snapshots and scheduled audits
pub struct AuditScheduler {
    queue: Arc<AuditQueue>,
    snapshots: Arc<SnapshotStore>,
    ledger: Arc<wallet_core::Storage>,
    metrics: Arc<Metrics>,
    config: AuditConfig,
}

impl AuditScheduler {
    /// Create a scheduler
    pub fn new(
        queue: Arc<AuditQueue>,
        snapshots: Arc<SnapshotStore>,
        ledger: Arc<wallet_core::Storage>,
        metrics: Arc<Metrics>,
        config: AuditConfig,
    ) -> Self {
        Self {
            queue,
            snapshots,
            ledger,
            metrics,
            config,
        }
    }

    /// Run all three loops until `shutdown` flips to true
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            snapshot_secs = self.config.snapshot_interval_secs,
            periodic_secs = self.config.periodic_audit_interval_secs,
            global_secs = self.config.global_audit_interval_secs,
            "Audit scheduler started"
        );

        let mut snapshot_tick =
            tokio::time::interval(Duration::from_secs(self.config.snapshot_interval_secs));
        let mut periodic_tick = tokio::time::interval(Duration::from_secs(
            self.config.periodic_audit_interval_secs,
        ));
        let mut global_tick =
            tokio::time::interval(Duration::from_secs(self.config.global_audit_interval_secs));
        let mut shutdown = shutdown;

        loop {
            tokio::select! {
                _ = snapshot_tick.tick() => {
                    if let Err(e) = self.run_snapshot_sweep() {
                        tracing::error!(error = %e, "Snapshot sweep failed");
                    }
                }
                _ = periodic_tick.tick() => {
                    if let Err(e) = self.enqueue_periodic_audits() {
                        tracing::error!(error = %e, "Periodic enqueue failed");
                    }
                }
                _ = global_tick.tick() => {
                    if let Err(e) = self.enqueue_global_audit() {
                        tracing::error!(error = %e, "Global enqueue failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Audit scheduler stopped");
    }

    /// Capture today's snapshot for every wallet
    pub fn run_snapshot_sweep(&self) -> Result<usize> {
        let today = Utc::now().date_naive();
        let captured = self.snapshots.capture_all(today)?;
        self.metrics.snapshots_total.inc_by(captured as u64);
        Ok(captured)
    }

    /// Enqueue one periodic audit job per wallet
    pub fn enqueue_periodic_audits(&self) -> Result<usize> {
        let wallets = self.ledger.iter_wallets()?;
        for wallet in &wallets {
            self.queue.enqueue(
                AuditEntity::Wallet(wallet.id),
                AuditType::Periodic,
                default_priority(AuditType::Periodic),
            )?;
        }

        tracing::debug!(wallets = wallets.len(), "Enqueued periodic audits");
        Ok(wallets.len())
    }

    /// Enqueue one global audit job per system wallet
    pub fn enqueue_global_audit(&self) -> Result<usize> {
        let systems = self.ledger.iter_system_wallets()?;
        for system in &systems {
            self.queue.enqueue(
                AuditEntity::SystemWallet(system.id),
                AuditType::Global,
                default_priority(AuditType::Global),
            )?;
        }
        Ok(systems.len())
    }
}

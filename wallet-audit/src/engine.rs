//! Audit engine facade
//!
//! Wires storage, queue, snapshot store, finding store, auditors, workers
//! and scheduler together behind one handle. The engine observes a ledger
//! store it does not own and never writes to it.

use crate::{
    auditor::Auditor,
    config::AuditConfig,
    error::Result,
    findings::FindingStore,
    metrics::Metrics,
    queue::{default_priority, AuditQueue},
    scheduler::AuditScheduler,
    snapshot::SnapshotStore,
    storage::AuditStorage,
    types::{AuditEntity, AuditFinding, AuditJob, AuditResult, AuditType},
    worker::AuditWorker,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Handle over the whole audit subsystem
pub struct AuditEngine {
    queue: Arc<AuditQueue>,
    findings: Arc<FindingStore>,
    snapshots: Arc<SnapshotStore>,
    auditor: Arc<Auditor>,
    ledger: Arc<wallet_core::Storage>,
    metrics: Arc<Metrics>,
    config: AuditConfig,
}

impl AuditEngine {
    /// Open the audit database and assemble the subsystem over `ledger`
    pub fn open(ledger: Arc<wallet_core::Storage>, config: AuditConfig) -> Result<Self> {
        let storage = Arc::new(AuditStorage::open(&config.data_dir)?);
        let findings = Arc::new(FindingStore::new(Arc::clone(&storage)));
        let snapshots = Arc::new(SnapshotStore::new(
            Arc::clone(&storage),
            Arc::clone(&ledger),
        ));
        let auditor = Arc::new(Auditor::new(
            Arc::clone(&ledger),
            Arc::clone(&findings),
            Arc::clone(&snapshots),
            config.clone(),
        ));
        let queue = Arc::new(AuditQueue::new(Arc::clone(&storage), config.clone()));
        let metrics = Arc::new(Metrics::new().map_err(|e| {
            crate::Error::Other(format!("Failed to register metrics: {}", e))
        })?);

        Ok(Self {
            queue,
            findings,
            snapshots,
            auditor,
            ledger,
            metrics,
            config,
        })
    }

    /// Metrics handle, for exposition
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// The job queue
    pub fn queue(&self) -> Arc<AuditQueue> {
        Arc::clone(&self.queue)
    }

    // Enqueue and direct-run operations

    /// Enqueue an audit at the default priority for its kind
    pub fn enqueue_audit(&self, entity: AuditEntity, audit_type: AuditType) -> Result<AuditJob> {
        self.queue
            .enqueue(entity, audit_type, default_priority(audit_type))
    }

    /// Enqueue an audit with explicit priority, start time, and attempt
    /// budget. `max_attempts` falls back to the configured default.
    pub fn schedule_audit(
        &self,
        entity: AuditEntity,
        audit_type: AuditType,
        priority: u8,
        scheduled_at: chrono::DateTime<chrono::Utc>,
        max_attempts: Option<u32>,
    ) -> Result<AuditJob> {
        self.queue.enqueue_job(
            crate::queue::DEFAULT_QUEUE,
            entity,
            audit_type,
            priority,
            scheduled_at,
            max_attempts,
        )
    }

    /// Run the realtime checks for one wallet synchronously, bypassing
    /// the queue. Meant to be called right after a mutation.
    pub fn audit_wallet_now(&self, wallet_id: Uuid) -> Result<AuditResult> {
        self.auditor.audit_wallet_realtime(wallet_id)
    }

    /// Run a full global audit synchronously
    pub fn run_global_audit(&self) -> Result<AuditResult> {
        self.auditor.audit_global()
    }

    /// Capture today's snapshot for every wallet
    pub fn run_snapshot_sweep(&self) -> Result<usize> {
        let today = chrono::Utc::now().date_naive();
        let captured = self.snapshots.capture_all(today)?;
        self.metrics.snapshots_total.inc_by(captured as u64);
        Ok(captured)
    }

    /// Re-arm a parked job after triage
    pub fn retry_audit_job(&self, job_id: Uuid) -> Result<AuditJob> {
        self.queue.retry_exhausted(job_id)
    }

    // Finding operations

    /// Resolve a finding (idempotent)
    pub fn resolve_finding(&self, finding_id: Uuid, resolved_by: Uuid) -> Result<AuditFinding> {
        self.findings.resolve(finding_id, resolved_by)
    }

    /// Mark a finding as a false positive (idempotent)
    pub fn mark_false_positive(&self, finding_id: Uuid) -> Result<AuditFinding> {
        self.findings.mark_false_positive(finding_id)
    }

    /// Move a finding to `Investigating`
    pub fn start_investigation(&self, finding_id: Uuid) -> Result<AuditFinding> {
        self.findings.start_investigation(finding_id)
    }

    /// Get one finding
    pub fn finding(&self, finding_id: Uuid) -> Result<AuditFinding> {
        self.findings.get(finding_id)
    }

    /// Open findings, most severe first
    pub fn pending_findings(&self) -> Result<Vec<AuditFinding>> {
        self.findings.pending()
    }

    /// Open critical findings
    pub fn critical_findings(&self) -> Result<Vec<AuditFinding>> {
        self.findings.critical()
    }

    // Background runtime

    /// Spawn `num_workers` workers plus the scheduler. The returned
    /// runtime stops them all on `shutdown`.
    pub fn start(&self, num_workers: usize) -> AuditRuntime {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(num_workers + 1);

        for _ in 0..num_workers {
            let worker = AuditWorker::new(
                Arc::clone(&self.queue),
                Arc::clone(&self.auditor),
                Arc::clone(&self.metrics),
                self.config.clone(),
            );
            handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }

        let scheduler = AuditScheduler::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.snapshots),
            Arc::clone(&self.ledger),
            Arc::clone(&self.metrics),
            self.config.clone(),
        );
        handles.push(tokio::spawn(scheduler.run(shutdown_rx)));

        tracing::info!(workers = num_workers, "Audit runtime started");

        AuditRuntime {
            shutdown_tx,
            handles,
        }
    }
}

/// Running workers and scheduler
pub struct AuditRuntime {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl AuditRuntime {
    /// Signal shutdown and wait for every task to finish
    pub async fn shutdown(self) {
        // Receivers may already be gone if tasks finished on their own
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("Audit runtime stopped");
    }
}

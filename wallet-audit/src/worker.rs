//! Audit worker loop
//!
//! Each worker polls the queue, claims one job at a time, dispatches it to
//! the matching auditor, and either completes the job or records the
//! failure so the queue reschedules it. Auditor runs are synchronous
//! RocksDB work, so they execute on the blocking pool with a hard timeout.

use crate::{
    auditor::Auditor,
    config::AuditConfig,
    error::{Error, Result},
    metrics::Metrics,
    queue::AuditQueue,
    types::{AuditJob, AuditResult, AuditType},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// One audit worker
pub struct AuditWorker {
    id: Uuid,
    queue: Arc<AuditQueue>,
    auditor: Arc<Auditor>,
    metrics: Arc<Metrics>,
    config: AuditConfig,
}

impl AuditWorker {
    /// Create a worker with a fresh identity
    pub fn new(
        queue: Arc<AuditQueue>,
        auditor: Arc<Auditor>,
        metrics: Arc<Metrics>,
        config: AuditConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            auditor,
            metrics,
            config,
        }
    }

    /// The worker's identity, as recorded on claims
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.id, "Audit worker started");

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.step().await {
                Ok(true) => {
                    // Processed a job; look for the next one immediately
                }
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Worker step failed");
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.id, "Audit worker stopped");
    }

    /// Claim and process at most one job. Returns whether a job was run.
    pub async fn step(&self) -> Result<bool> {
        let job = match self.queue.claim(self.id)? {
            Some(job) => job,
            None => return Ok(false),
        };

        let timer = self.metrics.audit_duration.start_timer();
        let outcome = self.execute(&job).await;
        timer.observe_duration();

        match outcome {
            Ok(result) => {
                self.queue.complete(job.id, self.id)?;
                self.metrics.jobs_processed_total.inc();
                if !result.is_clean() {
                    self.metrics
                        .findings_total
                        .inc_by(result.anomalies.len() as u64);
                }
                tracing::debug!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    checks = result.checks_performed,
                    anomalies = result.anomalies.len(),
                    "Audit job done"
                );
            }
            Err(e) => {
                self.metrics.jobs_failed_total.inc();
                let updated = self.queue.record_failure(job.id, &e.to_string())?;
                if updated.is_exhausted() {
                    self.metrics.jobs_exhausted_total.inc();
                }
            }
        }

        if let Ok(depth) = self.queue.depth() {
            self.metrics.queue_depth.set(depth as i64);
        }

        Ok(true)
    }

    async fn execute(&self, job: &AuditJob) -> Result<AuditResult> {
        let auditor = Arc::clone(&self.auditor);
        let job_id = job.id;
        let entity = job.entity;
        let audit_type = job.audit_type;

        let handle = tokio::task::spawn_blocking(move || match audit_type {
            AuditType::Realtime => auditor.audit_wallet_realtime(entity.id()),
            AuditType::Periodic => auditor.audit_wallet_periodic(entity.id()),
            AuditType::Global => auditor.audit_global(),
        });

        let timeout = Duration::from_secs(self.config.job_timeout_secs);
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::Other(format!("Audit task panicked: {}", join_err))),
            Err(_) => Err(Error::JobTimeout(job_id)),
        }
    }
}

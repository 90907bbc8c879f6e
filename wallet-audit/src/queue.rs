//! Prioritized, retryable audit job queue
//!
//! Jobs are consumed in (priority, scheduled_at) order. A failed attempt
//! reschedules the job with exponential backoff, `min(cap, base * 2^attempts)`
//! seconds; once the attempt budget is spent the job is parked a day out for
//! operator triage instead of being dropped.
//!
//! Claiming is a single atomic select-and-mark: the scan and the lease write
//! happen under one mutex, so two workers polling concurrently can never run
//! the same job.

use crate::{
    config::AuditConfig,
    error::{Error, Result},
    storage::AuditStorage,
    types::{AuditEntity, AuditJob, AuditType},
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Priority at or above which a job counts as high priority (lower = hotter)
pub const HIGH_PRIORITY_THRESHOLD: u8 = 3;

/// Queue jobs land on unless the caller names one
pub const DEFAULT_QUEUE: &str = "audits";

/// Backoff delay in seconds for the given attempt count,
/// `min(cap, base * 2^attempts)`
pub fn backoff_delay(base_secs: u64, cap_secs: u64, attempts: u32) -> u64 {
    let exp = attempts.min(63);
    cap_secs.min(base_secs.saturating_mul(1u64 << exp))
}

/// Default priority per auditor kind
pub fn default_priority(audit_type: AuditType) -> u8 {
    match audit_type {
        AuditType::Realtime => 1,
        AuditType::Global => 3,
        AuditType::Periodic => 5,
    }
}

/// The audit job queue
pub struct AuditQueue {
    storage: Arc<AuditStorage>,
    config: AuditConfig,
    // Serializes claim's select-and-mark
    claim_lock: Mutex<()>,
}

impl AuditQueue {
    /// Create a queue over the audit database
    pub fn new(storage: Arc<AuditStorage>, config: AuditConfig) -> Self {
        Self {
            storage,
            config,
            claim_lock: Mutex::new(()),
        }
    }

    /// Enqueue a job on the default queue, runnable immediately, with the
    /// default attempt budget
    pub fn enqueue(
        &self,
        entity: AuditEntity,
        audit_type: AuditType,
        priority: u8,
    ) -> Result<AuditJob> {
        self.enqueue_job(DEFAULT_QUEUE, entity, audit_type, priority, Utc::now(), None)
    }

    /// Enqueue a job on the default queue that becomes runnable at
    /// `scheduled_at`
    pub fn enqueue_at(
        &self,
        entity: AuditEntity,
        audit_type: AuditType,
        priority: u8,
        scheduled_at: DateTime<Utc>,
    ) -> Result<AuditJob> {
        self.enqueue_job(DEFAULT_QUEUE, entity, audit_type, priority, scheduled_at, None)
    }

    /// Fully parameterized enqueue. `max_attempts` falls back to the
    /// configured default when `None`.
    pub fn enqueue_job(
        &self,
        queue_name: &str,
        entity: AuditEntity,
        audit_type: AuditType,
        priority: u8,
        scheduled_at: DateTime<Utc>,
        max_attempts: Option<u32>,
    ) -> Result<AuditJob> {
        let job = AuditJob {
            id: Uuid::now_v7(),
            queue_name: queue_name.to_string(),
            entity,
            audit_type,
            priority,
            attempts: 0,
            max_attempts: max_attempts.unwrap_or(self.config.default_max_attempts),
            scheduled_at,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            created_at: Utc::now(),
        };
        self.storage.put_job(&job, None)?;

        tracing::debug!(
            job_id = %job.id,
            entity = %job.entity,
            priority = job.priority,
            "Enqueued audit job"
        );

        Ok(job)
    }

    /// Jobs runnable now, unclaimed, in consumption order
    pub fn ready(&self) -> Result<Vec<AuditJob>> {
        let now = Utc::now();
        Ok(self
            .storage
            .jobs_in_order()?
            .into_iter()
            .filter(|job| job.is_ready(now) && !self.is_claimed(job, now))
            .collect())
    }

    /// Ready jobs at high priority only
    pub fn high_priority(&self) -> Result<Vec<AuditJob>> {
        Ok(self
            .ready()?
            .into_iter()
            .filter(|job| job.priority <= HIGH_PRIORITY_THRESHOLD)
            .collect())
    }

    /// Atomically claim the hottest ready job for `worker_id`.
    ///
    /// Returns `None` when nothing is runnable. An expired lease is treated
    /// as unclaimed, so a job abandoned by a dead worker becomes claimable
    /// again after `claim_lease_secs`.
    pub fn claim(&self, worker_id: Uuid) -> Result<Option<AuditJob>> {
        let _guard = self.claim_lock.lock();

        let now = Utc::now();
        for job in self.storage.jobs_in_order()? {
            if !job.is_ready(now) || self.is_claimed(&job, now) {
                continue;
            }

            let mut claimed = job.clone();
            claimed.claimed_by = Some(worker_id);
            claimed.claimed_at = Some(now);
            self.storage.put_job(&claimed, Some(&job))?;

            tracing::debug!(job_id = %claimed.id, worker_id = %worker_id, "Claimed audit job");
            return Ok(Some(claimed));
        }

        Ok(None)
    }

    /// Release a claim without consuming an attempt
    pub fn release(&self, job_id: Uuid, worker_id: Uuid) -> Result<()> {
        let job = self.storage.get_job(job_id)?;
        if job.claimed_by != Some(worker_id) {
            return Err(Error::AlreadyClaimed(job_id));
        }

        let mut released = job.clone();
        released.claimed_by = None;
        released.claimed_at = None;
        self.storage.put_job(&released, Some(&job))?;
        Ok(())
    }

    /// Remove a successfully processed job
    pub fn complete(&self, job_id: Uuid, worker_id: Uuid) -> Result<()> {
        let job = self.storage.get_job(job_id)?;
        if job.claimed_by != Some(worker_id) {
            return Err(Error::AlreadyClaimed(job_id));
        }
        self.storage.remove_job(&job)?;

        tracing::debug!(job_id = %job_id, "Completed audit job");
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Within budget the job is rescheduled with exponential backoff; when
    /// the budget is spent it is parked `exhausted_park_secs` out with its
    /// claim cleared.
    pub fn record_failure(&self, job_id: Uuid, error: &str) -> Result<AuditJob> {
        let job = self.storage.get_job(job_id)?;
        let now = Utc::now();

        let mut updated = job.clone();
        updated.attempts += 1;
        updated.claimed_by = None;
        updated.claimed_at = None;
        updated.last_error = Some(error.to_string());

        if updated.is_exhausted() {
            updated.scheduled_at = now + Duration::seconds(self.config.exhausted_park_secs as i64);
            tracing::warn!(
                job_id = %job_id,
                attempts = updated.attempts,
                error = %error,
                "Audit job exhausted its attempts, parked for triage"
            );
        } else {
            let delay = self.backoff_secs(updated.attempts);
            updated.scheduled_at = now + Duration::seconds(delay as i64);
            tracing::debug!(
                job_id = %job_id,
                attempts = updated.attempts,
                delay_secs = delay,
                "Audit job failed, rescheduled"
            );
        }

        self.storage.put_job(&updated, Some(&job))?;
        Ok(updated)
    }

    /// Re-arm a parked job: the attempt counter resets and the job
    /// becomes runnable immediately. Operator action after triage.
    pub fn retry_exhausted(&self, job_id: Uuid) -> Result<AuditJob> {
        let job = self.storage.get_job(job_id)?;

        let mut rearmed = job.clone();
        rearmed.attempts = 0;
        rearmed.scheduled_at = Utc::now();
        rearmed.claimed_by = None;
        rearmed.claimed_at = None;
        self.storage.put_job(&rearmed, Some(&job))?;

        tracing::info!(job_id = %job_id, "Parked audit job re-armed");
        Ok(rearmed)
    }

    /// Backoff delay in seconds for the given attempt count
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        backoff_delay(
            self.config.backoff_base_secs,
            self.config.backoff_cap_secs,
            attempts,
        )
    }

    /// Approximate number of jobs in the queue
    pub fn depth(&self) -> Result<u64> {
        self.storage.queue_depth()
    }

    fn is_claimed(&self, job: &AuditJob, now: DateTime<Utc>) -> bool {
        match job.claimed_at {
            Some(claimed_at) => {
                now - claimed_at < Duration::seconds(self.config.claim_lease_secs as i64)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_queue() -> (AuditQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(AuditStorage::open(temp_dir.path()).unwrap());
        let queue = AuditQueue::new(storage, AuditConfig::default());
        (queue, temp_dir)
    }

    fn wallet_entity() -> AuditEntity {
        AuditEntity::Wallet(Uuid::new_v4())
    }

    #[test]
    fn test_claim_respects_priority() {
        let (queue, _temp) = test_queue();

        let periodic = queue
            .enqueue(wallet_entity(), AuditType::Periodic, 5)
            .unwrap();
        let realtime = queue
            .enqueue(wallet_entity(), AuditType::Realtime, 1)
            .unwrap();

        let worker = Uuid::new_v4();
        let first = queue.claim(worker).unwrap().unwrap();
        assert_eq!(first.id, realtime.id);

        let second = queue.claim(worker).unwrap().unwrap();
        assert_eq!(second.id, periodic.id);
    }

    #[test]
    fn test_claimed_job_invisible_to_other_workers() {
        let (queue, _temp) = test_queue();
        queue
            .enqueue(wallet_entity(), AuditType::Realtime, 1)
            .unwrap();

        let first = queue.claim(Uuid::new_v4()).unwrap();
        assert!(first.is_some());

        // Same job must not be handed out twice while the lease holds
        let second = queue.claim(Uuid::new_v4()).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_future_job_not_ready() {
        let (queue, _temp) = test_queue();
        queue
            .enqueue_at(
                wallet_entity(),
                AuditType::Periodic,
                5,
                Utc::now() + Duration::hours(1),
            )
            .unwrap();

        assert!(queue.ready().unwrap().is_empty());
        assert!(queue.claim(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let (queue, _temp) = test_queue();

        assert_eq!(queue.backoff_secs(1), 120);
        assert_eq!(queue.backoff_secs(2), 240);
        assert_eq!(queue.backoff_secs(3), 480);
        // 60 * 2^6 = 3840 > 3600
        assert_eq!(queue.backoff_secs(6), 3600);
        assert_eq!(queue.backoff_secs(40), 3600);
    }

    #[test]
    fn test_failure_reschedules_with_backoff() {
        let (queue, _temp) = test_queue();
        let job = queue
            .enqueue(wallet_entity(), AuditType::Periodic, 5)
            .unwrap();

        let worker = Uuid::new_v4();
        let claimed = queue.claim(worker).unwrap().unwrap();
        assert_eq!(claimed.id, job.id);

        let before = Utc::now();
        let failed = queue.record_failure(job.id, "ledger unavailable").unwrap();
        assert_eq!(failed.attempts, 1);
        assert!(failed.claimed_by.is_none());
        assert_eq!(failed.last_error.as_deref(), Some("ledger unavailable"));
        // Rescheduled roughly base * 2^1 out
        let delay = (failed.scheduled_at - before).num_seconds();
        assert!((115..=125).contains(&delay), "delay was {}", delay);
    }

    #[test]
    fn test_exhausted_job_parked_not_dropped() {
        let (queue, _temp) = test_queue();
        let job = queue
            .enqueue(wallet_entity(), AuditType::Periodic, 5)
            .unwrap();

        let worker = Uuid::new_v4();
        let mut last = job.clone();
        for _ in 0..last.max_attempts {
            let claimed = queue.claim(worker).unwrap();
            // Later attempts are scheduled in the future, so force-claim
            // by recording the failure directly
            if let Some(c) = claimed {
                assert_eq!(c.id, job.id);
            }
            last = queue.record_failure(job.id, "boom").unwrap();
        }

        assert!(last.is_exhausted());
        // Still present, parked roughly a day out
        let parked = (last.scheduled_at - Utc::now()).num_seconds();
        assert!(parked > 23 * 3600, "parked only {} secs out", parked);
        assert_eq!(queue.storage.jobs_in_order().unwrap().len(), 1);
    }

    #[test]
    fn test_rearmed_job_runs_again() {
        let (queue, _temp) = test_queue();
        let job = queue
            .enqueue(wallet_entity(), AuditType::Periodic, 5)
            .unwrap();

        for _ in 0..job.max_attempts {
            queue.record_failure(job.id, "boom").unwrap();
        }
        assert!(queue.claim(Uuid::new_v4()).unwrap().is_none());

        let rearmed = queue.retry_exhausted(job.id).unwrap();
        assert_eq!(rearmed.attempts, 0);
        let claimed = queue.claim(Uuid::new_v4()).unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
    }

    #[test]
    fn test_complete_removes_job() {
        let (queue, _temp) = test_queue();
        let job = queue
            .enqueue(wallet_entity(), AuditType::Realtime, 1)
            .unwrap();

        let worker = Uuid::new_v4();
        queue.claim(worker).unwrap().unwrap();
        queue.complete(job.id, worker).unwrap();

        assert!(queue.ready().unwrap().is_empty());
        assert!(matches!(
            queue.complete(job.id, worker),
            Err(Error::JobNotFound(_))
        ));
    }

    #[test]
    fn test_complete_requires_claim_ownership() {
        let (queue, _temp) = test_queue();
        let job = queue
            .enqueue(wallet_entity(), AuditType::Realtime, 1)
            .unwrap();

        let owner = Uuid::new_v4();
        queue.claim(owner).unwrap().unwrap();

        let intruder = Uuid::new_v4();
        assert!(matches!(
            queue.complete(job.id, intruder),
            Err(Error::AlreadyClaimed(_))
        ));
    }

    #[test]
    fn test_custom_attempt_budget_and_queue_name() {
        let (queue, _temp) = test_queue();
        let job = queue
            .enqueue_job(
                "nightly",
                wallet_entity(),
                AuditType::Periodic,
                5,
                Utc::now(),
                Some(1),
            )
            .unwrap();
        assert_eq!(job.queue_name, "nightly");
        assert_eq!(job.max_attempts, 1);

        // A budget of one means a single failure parks the job
        queue.claim(Uuid::new_v4()).unwrap().unwrap();
        let failed = queue.record_failure(job.id, "boom").unwrap();
        assert!(failed.is_exhausted());
        assert_eq!(failed.queue_name, "nightly");
        assert!(queue.claim(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_enqueue_defaults_from_config() {
        let (queue, _temp) = test_queue();
        let job = queue
            .enqueue(wallet_entity(), AuditType::Realtime, 1)
            .unwrap();
        assert_eq!(job.queue_name, DEFAULT_QUEUE);
        assert_eq!(job.max_attempts, AuditConfig::default().default_max_attempts);
    }

    #[test]
    fn test_high_priority_filter() {
        let (queue, _temp) = test_queue();
        queue
            .enqueue(wallet_entity(), AuditType::Periodic, 5)
            .unwrap();
        let hot = queue
            .enqueue(wallet_entity(), AuditType::Realtime, 1)
            .unwrap();

        let high = queue.high_priority().unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].id, hot.id);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Backoff never shrinks as attempts grow and never exceeds
            /// the cap, for any pair of attempt counts.
            #[test]
            fn prop_backoff_monotonic_and_capped(a in 0u32..200, b in 0u32..200) {
                let config = AuditConfig::default();
                let lo = a.min(b);
                let hi = a.max(b);

                let d_lo = backoff_delay(config.backoff_base_secs, config.backoff_cap_secs, lo);
                let d_hi = backoff_delay(config.backoff_base_secs, config.backoff_cap_secs, hi);

                prop_assert!(d_lo <= d_hi);
                prop_assert!(d_hi <= config.backoff_cap_secs);
                prop_assert!(d_lo >= config.backoff_base_secs.min(config.backoff_cap_secs));
            }
        }
    }
}

//! Storage layer for the audit subsystem
//!
//! Separate RocksDB instance from the ledger store; the auditors only ever
//! read the ledger, they never write it.
//!
//! # Column Families
//!
//! - `snapshots` - Daily wallet snapshots (key: wallet_id || day_be)
//! - `queue` - Audit jobs (key: job_id)
//! - `queue_index` - Consumption order (key: priority || scheduled_at || job_id)
//! - `findings` - Audit findings, insert-then-terminal-status only (key: finding_id)
//! - `fingerprints` - Open-finding dedup index (key: fingerprint, value: finding_id)

use crate::{
    error::{Error, Result},
    snapshot::AuditSnapshot,
    types::{AuditFinding, AuditJob},
};
use chrono::{Datelike, NaiveDate};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use uuid::Uuid;

/// Column family names
const CF_SNAPSHOTS: &str = "snapshots";
const CF_QUEUE: &str = "queue";
const CF_QUEUE_INDEX: &str = "queue_index";
const CF_FINDINGS: &str = "findings";
const CF_FINGERPRINTS: &str = "fingerprints";

/// Storage wrapper for the audit RocksDB instance
pub struct AuditStorage {
    db: DB,
}

impl AuditStorage {
    /// Open or create database
    pub fn open(data_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_SNAPSHOTS, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_QUEUE, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_QUEUE_INDEX, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_FINDINGS, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_FINGERPRINTS, Self::cf_options()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, data_dir, cf_descriptors)?;

        tracing::info!(path = ?data_dir, "Opened audit storage");

        Ok(Self { db })
    }

    fn cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn snapshot_key(wallet_id: &Uuid, date: NaiveDate) -> [u8; 24] {
        let mut key = [0u8; 24];
        key[..16].copy_from_slice(wallet_id.as_bytes());
        // Days since CE keep the per-wallet range date-ordered
        let days = date.num_days_from_ce() as i64;
        key[16..].copy_from_slice(&days.to_be_bytes());
        key
    }

    fn queue_index_key(job: &AuditJob) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 8 + 16);
        key.push(job.priority);
        key.extend_from_slice(&job.scheduled_at.timestamp().to_be_bytes());
        key.extend_from_slice(job.id.as_bytes());
        key
    }

    // Snapshot operations

    /// Insert or overwrite the snapshot for (wallet, day)
    pub fn put_snapshot(&self, snapshot: &AuditSnapshot) -> Result<()> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;
        let key = Self::snapshot_key(&snapshot.wallet_id, snapshot.snapshot_date);
        self.db.put_cf(cf, key, bincode::serialize(snapshot)?)?;
        Ok(())
    }

    /// Get the snapshot for a specific day, if present
    pub fn get_snapshot(&self, wallet_id: Uuid, date: NaiveDate) -> Result<Option<AuditSnapshot>> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;
        let key = Self::snapshot_key(&wallet_id, date);
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Most recent snapshot for a wallet, if any
    pub fn latest_snapshot(&self, wallet_id: Uuid) -> Result<Option<AuditSnapshot>> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;

        // Reverse scan from just past the wallet's key range
        let mut upper = [0xffu8; 24];
        upper[..16].copy_from_slice(wallet_id.as_bytes());

        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(&upper, rocksdb::Direction::Reverse),
        );

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(wallet_id.as_bytes()) {
                break;
            }
            return Ok(Some(bincode::deserialize(&value)?));
        }

        Ok(None)
    }

    // Queue operations

    /// Insert or update a job, keeping the consumption-order index in sync.
    /// `prev` is the job's previous state when rescheduling.
    pub fn put_job(&self, job: &AuditJob, prev: Option<&AuditJob>) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_queue = self.cf_handle(CF_QUEUE)?;
        batch.put_cf(cf_queue, job.id.as_bytes(), bincode::serialize(job)?);

        let cf_index = self.cf_handle(CF_QUEUE_INDEX)?;
        if let Some(prev) = prev {
            let old_key = Self::queue_index_key(prev);
            let new_key = Self::queue_index_key(job);
            if old_key != new_key {
                batch.delete_cf(cf_index, old_key);
            }
        }
        batch.put_cf(cf_index, Self::queue_index_key(job), job.id.as_bytes());

        self.db.write(batch)?;
        Ok(())
    }

    /// Delete a completed job and its index entry
    pub fn remove_job(&self, job: &AuditJob) -> Result<()> {
        let mut batch = WriteBatch::default();
        let cf_queue = self.cf_handle(CF_QUEUE)?;
        batch.delete_cf(cf_queue, job.id.as_bytes());
        let cf_index = self.cf_handle(CF_QUEUE_INDEX)?;
        batch.delete_cf(cf_index, Self::queue_index_key(job));
        self.db.write(batch)?;
        Ok(())
    }

    /// Get job by ID
    pub fn get_job(&self, job_id: Uuid) -> Result<AuditJob> {
        let cf = self.cf_handle(CF_QUEUE)?;
        let value = self
            .db
            .get_cf(cf, job_id.as_bytes())?
            .ok_or(Error::JobNotFound(job_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All jobs in consumption order: (priority asc, scheduled_at asc)
    pub fn jobs_in_order(&self) -> Result<Vec<AuditJob>> {
        let cf_index = self.cf_handle(CF_QUEUE_INDEX)?;

        let mut jobs = Vec::new();
        for item in self.db.iterator_cf(cf_index, IteratorMode::Start) {
            let (_, value) = item?;
            let job_id_bytes: [u8; 16] = value
                .as_ref()
                .try_into()
                .map_err(|_| Error::Storage("Malformed queue index value".to_string()))?;
            jobs.push(self.get_job(Uuid::from_bytes(job_id_bytes))?);
        }
        Ok(jobs)
    }

    /// Approximate queue depth
    pub fn queue_depth(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_QUEUE)?;
        Ok(self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }

    // Finding operations

    /// Insert a new finding and register its fingerprint as open
    pub fn insert_finding(&self, finding: &AuditFinding) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_findings = self.cf_handle(CF_FINDINGS)?;
        batch.put_cf(cf_findings, finding.id.as_bytes(), bincode::serialize(finding)?);

        let cf_fp = self.cf_handle(CF_FINGERPRINTS)?;
        batch.put_cf(cf_fp, finding.fingerprint.as_bytes(), finding.id.as_bytes());

        self.db.write(batch)?;
        Ok(())
    }

    /// Update a finding in place. When it reached a terminal status, the
    /// fingerprint is released so a recurrence creates a fresh row.
    pub fn update_finding(&self, finding: &AuditFinding) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_findings = self.cf_handle(CF_FINDINGS)?;
        batch.put_cf(cf_findings, finding.id.as_bytes(), bincode::serialize(finding)?);

        if finding.status.is_terminal() {
            let cf_fp = self.cf_handle(CF_FINGERPRINTS)?;
            batch.delete_cf(cf_fp, finding.fingerprint.as_bytes());
        }

        self.db.write(batch)?;
        Ok(())
    }

    /// Get finding by ID
    pub fn get_finding(&self, finding_id: Uuid) -> Result<AuditFinding> {
        let cf = self.cf_handle(CF_FINDINGS)?;
        let value = self
            .db
            .get_cf(cf, finding_id.as_bytes())?
            .ok_or(Error::FindingNotFound(finding_id))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Look up the open finding with this fingerprint, if any
    pub fn open_finding_by_fingerprint(&self, fingerprint: &str) -> Result<Option<AuditFinding>> {
        let cf = self.cf_handle(CF_FINGERPRINTS)?;
        match self.db.get_cf(cf, fingerprint.as_bytes())? {
            Some(value) => {
                let id_bytes: [u8; 16] = AsRef::<[u8]>::as_ref(&value)
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed fingerprint value".to_string()))?;
                Ok(Some(self.get_finding(Uuid::from_bytes(id_bytes))?))
            }
            None => Ok(None),
        }
    }

    /// All findings (operator listings filter on top of this)
    pub fn iter_findings(&self) -> Result<Vec<AuditFinding>> {
        let cf = self.cf_handle(CF_FINDINGS)?;
        let mut findings = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            findings.push(bincode::deserialize(&value)?);
        }
        Ok(findings)
    }
}

//! Job persistence on top of a [`JobStore`].
//!
//! `JobStorage` owns the key layout and the record encoding:
//!
//! - `{prefix}:job:{id}` holds the record fields
//! - `{prefix}:queue:{type}` is the dispatch index, scored by execution time
//!
//! Numbers are stored as decimal strings so records stay readable from
//! `redis-cli`.

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult, StoreError, StoreResult};
use crate::job::{Job, JobId, JobStatus, now_millis};
use crate::store::{ClaimRequest, FieldMap, JobStore, WriteBatch, fields};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Index members inspected per claim or peek.
const CLAIM_SCAN_LIMIT: usize = 32;

/// Job persistence and lookup.
#[derive(Clone)]
pub struct JobStorage {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
}

impl JobStorage {
    /// Create storage over a store backend.
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        debug!(
            store = store.store_type(),
            prefix = %config.key_prefix,
            "Creating job storage"
        );
        Self { store, config }
    }

    /// The store backend.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// The queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Key of a job record.
    pub fn record_key(&self, id: &JobId) -> String {
        self.config.key(&format!("job:{}", id))
    }

    /// Key of a job type's dispatch index.
    pub fn index_key(&self, job_type: &str) -> String {
        self.config.key(&format!("queue:{}", job_type))
    }

    fn record_prefix(&self) -> String {
        self.config.key("job:")
    }

    /// Write a pending job record and index it for dispatch.
    ///
    /// An existing id may only be overwritten while it is still `pending`;
    /// the original `created_at` is kept and any expiry cleared. A job that
    /// was claimed or finished yields `InvalidTransition`.
    pub async fn put_job(&self, job: &Job) -> QueueResult<Job> {
        if job.status != JobStatus::Pending {
            return Err(QueueError::Validation(format!(
                "cannot store job with status {}",
                job.status
            )));
        }

        let key = self.record_key(&job.id);
        let member = job.id.to_string();
        let now = now_millis();

        let previous_type = self
            .store
            .field_read(&key, fields::TYPE)
            .await
            .map_err(QueueError::read("put_job"))?;

        let mut batch = WriteBatch::new().guard_absent_or_field_in(
            &key,
            fields::STATUS,
            [JobStatus::Pending.as_str()],
        );
        if let Some(previous) = previous_type
            && previous != job.job_type.as_bytes()
        {
            let previous = String::from_utf8_lossy(&previous);
            batch = batch.index_remove(&self.index_key(&previous), &member);
        }

        let batch = batch
            .set_field_if_absent(&key, fields::CREATED_AT, now.to_string())
            .set_field(&key, fields::TYPE, job.job_type.as_str())
            .set_field(&key, fields::PAYLOAD, job.payload.clone())
            .set_field(&key, fields::STATUS, job.status.as_str())
            .set_field(&key, fields::EXECUTION_TIME, job.execution_time.to_string())
            .set_field(&key, fields::UPDATED_AT, now.to_string())
            .set_field(&key, fields::ATTEMPTS, job.attempts.to_string())
            .remove_field(&key, fields::LEASE_EXPIRES_AT)
            .persist(&key)
            .index_insert(&self.index_key(&job.job_type), &member, job.execution_time);

        let applied = self
            .store
            .apply(batch)
            .await
            .map_err(QueueError::write("put_job"))?;

        if !applied {
            return Err(self.transition_error(&job.id, JobStatus::Pending, "put_job").await);
        }

        let created_at = self
            .store
            .field_read(&key, fields::CREATED_AT)
            .await
            .map_err(QueueError::read("put_job"))?
            .map(|raw| parse_i64(fields::CREATED_AT, &raw))
            .transpose()
            .map_err(QueueError::read("put_job"))?
            .unwrap_or(now);

        debug!(job_id = %job.id, job_type = %job.job_type, execution_time = job.execution_time, "Job stored");

        Ok(Job {
            created_at,
            updated_at: now,
            lease_expires_at: None,
            ..job.clone()
        })
    }

    /// Load a job record.
    pub async fn get_job(&self, id: &JobId) -> QueueResult<Job> {
        let key = self.record_key(id);
        let mut record = self
            .store
            .field_read_all(&key)
            .await
            .map_err(QueueError::read("get_job"))?;

        if record.is_empty() {
            return Err(QueueError::JobNotFound(id.to_string()));
        }

        // Records written without the field carry it only as the index score.
        if !record.contains_key(fields::EXECUTION_TIME) {
            let job_type = field_str(&record, fields::TYPE).map_err(QueueError::read("get_job"))?;
            let score = self
                .store
                .sorted_score(&self.index_key(&job_type), &id.to_string())
                .await
                .map_err(QueueError::read("get_job"))?;
            if let Some(score) = score {
                record.insert(fields::EXECUTION_TIME.to_string(), score.to_string().into_bytes());
            }
        }

        decode_job(*id, &record).map_err(QueueError::read("get_job"))
    }

    /// Remove a job from its dispatch index. The record is left alone.
    pub async fn dequeue_job(&self, id: &JobId) -> QueueResult<()> {
        let key = self.record_key(id);
        let job_type = self
            .store
            .field_read(&key, fields::TYPE)
            .await
            .map_err(QueueError::read("dequeue_job"))?;

        let Some(job_type) = job_type else {
            trace!(job_id = %id, "Dequeue of unknown job ignored");
            return Ok(());
        };

        let index = self.index_key(&String::from_utf8_lossy(&job_type));
        self.store
            .sorted_remove(&index, &id.to_string())
            .await
            .map_err(QueueError::write("dequeue_job"))?;
        Ok(())
    }

    /// Set a job's status.
    ///
    /// Only the record changes; the dispatch index is left as it is.
    pub async fn set_job_status(&self, id: &JobId, status: JobStatus) -> QueueResult<()> {
        let sources = JobStatus::sources_for(status);
        if sources.is_empty() {
            return Err(self.transition_error(id, status, "set_job_status").await);
        }

        let key = self.record_key(id);
        let batch = WriteBatch::new()
            .guard_field_in(&key, fields::STATUS, sources.iter().map(|s| s.as_str()))
            .set_field(&key, fields::STATUS, status.as_str())
            .set_field(&key, fields::UPDATED_AT, now_millis().to_string());

        let applied = self
            .store
            .apply(batch)
            .await
            .map_err(QueueError::write("set_job_status"))?;

        if !applied {
            return Err(self.transition_error(id, status, "set_job_status").await);
        }

        trace!(job_id = %id, status = %status, "Job status set");
        Ok(())
    }

    /// Delete a job record and its index entry.
    ///
    /// Returns whether the record existed.
    pub async fn delete_job(&self, id: &JobId) -> QueueResult<bool> {
        let key = self.record_key(id);
        let job_type = self
            .store
            .field_read(&key, fields::TYPE)
            .await
            .map_err(QueueError::read("delete_job"))?;

        let mut batch = WriteBatch::new().guard_exists(&key);
        if let Some(job_type) = job_type {
            let index = self.index_key(&String::from_utf8_lossy(&job_type));
            batch = batch.index_remove(&index, &id.to_string());
        }
        let batch = batch.delete_key(&key);

        let deleted = self
            .store
            .apply(batch)
            .await
            .map_err(QueueError::write("delete_job"))?;

        if deleted {
            debug!(job_id = %id, "Job deleted");
        }
        Ok(deleted)
    }

    /// Peek at the next due job of a type without claiming it.
    ///
    /// Stale index entries found on the way are removed and the scan moves
    /// on to the next due member.
    pub async fn get_executable_job(&self, job_type: &str) -> QueueResult<Option<Job>> {
        let index = self.index_key(job_type);
        let due = self
            .store
            .sorted_range_by_score(&index, now_millis(), CLAIM_SCAN_LIMIT)
            .await
            .map_err(QueueError::read("get_executable_job"))?;

        for member in due {
            let job = match Uuid::parse_str(&member) {
                Ok(id) => match self.get_job(&id).await {
                    Ok(job) => Some(job),
                    Err(QueueError::JobNotFound(_)) => None,
                    Err(e) => return Err(e),
                },
                Err(_) => None,
            };

            match job {
                Some(job) if !job.is_terminal() => return Ok(Some(job)),
                _ => {
                    warn!(job_type = %job_type, member = %member, "Removing stale index entry");
                    self.store
                        .sorted_remove(&index, &member)
                        .await
                        .map_err(QueueError::write("get_executable_job"))?;
                }
            }
        }

        Ok(None)
    }

    /// Atomically claim the next due job of a type.
    ///
    /// The claimed job is `running` with a lease of `lease` from now.
    pub async fn claim_executable_job(
        &self,
        job_type: &str,
        lease: Duration,
    ) -> QueueResult<Option<Job>> {
        let now = now_millis();
        let claim = ClaimRequest {
            index: self.index_key(job_type),
            record_prefix: self.record_prefix(),
            now,
            lease_until: lease_deadline(now, lease),
            scan_limit: CLAIM_SCAN_LIMIT,
        };

        let claimed = self
            .store
            .claim_due(claim)
            .await
            .map_err(QueueError::write("claim_executable_job"))?;

        let Some(member) = claimed else {
            return Ok(None);
        };

        let id = Uuid::parse_str(&member)
            .map_err(|e| StoreError::Malformed(format!("index member '{}': {}", member, e)))
            .map_err(QueueError::read("claim_executable_job"))?;

        match self.get_job(&id).await {
            Ok(job) => {
                debug!(job_id = %id, job_type = %job_type, attempts = job.attempts, "Job claimed");
                Ok(Some(job))
            }
            // Deleted between the claim and the read.
            Err(QueueError::JobNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Mark a job running under a lease of `lease` from now.
    pub async fn mark_running(&self, id: &JobId, lease: Duration) -> QueueResult<()> {
        let key = self.record_key(id);
        let job_type = self.job_type(id, "mark_running").await?;
        let now = now_millis();
        let lease_until = lease_deadline(now, lease);

        let batch = WriteBatch::new()
            .guard_field_in(
                &key,
                fields::STATUS,
                JobStatus::sources_for(JobStatus::Running)
                    .iter()
                    .map(|s| s.as_str()),
            )
            .set_field(&key, fields::STATUS, JobStatus::Running.as_str())
            .set_field(&key, fields::LEASE_EXPIRES_AT, lease_until.to_string())
            .set_field(&key, fields::UPDATED_AT, now.to_string())
            .index_update(&self.index_key(&job_type), &id.to_string(), lease_until);

        let applied = self
            .store
            .apply(batch)
            .await
            .map_err(QueueError::write("mark_running"))?;

        if !applied {
            return Err(self.transition_error(id, JobStatus::Running, "mark_running").await);
        }

        trace!(job_id = %id, lease_until, "Job marked running");
        Ok(())
    }

    /// Move a running job to a terminal status, drop it from its index and
    /// start its retention countdown.
    pub async fn finalize_job(
        &self,
        id: &JobId,
        status: JobStatus,
        retention: Duration,
    ) -> QueueResult<()> {
        if !status.is_terminal() {
            return Err(QueueError::Validation(format!(
                "cannot finalize job with non-terminal status {}",
                status
            )));
        }

        let key = self.record_key(id);
        let job_type = self.job_type(id, "finalize_job").await?;

        let batch = WriteBatch::new()
            .guard_field_in(
                &key,
                fields::STATUS,
                JobStatus::sources_for(status).iter().map(|s| s.as_str()),
            )
            .index_remove(&self.index_key(&job_type), &id.to_string())
            .set_field(&key, fields::STATUS, status.as_str())
            .set_field(&key, fields::UPDATED_AT, now_millis().to_string())
            .remove_field(&key, fields::LEASE_EXPIRES_AT)
            .expire(&key, retention);

        let applied = self
            .store
            .apply(batch)
            .await
            .map_err(QueueError::write("finalize_job"))?;

        if !applied {
            return Err(self.transition_error(id, status, "finalize_job").await);
        }

        debug!(job_id = %id, status = %status, retention = ?retention, "Job finalized");
        Ok(())
    }

    /// Expire a job record after `ttl`.
    pub async fn set_expiry(&self, id: &JobId, ttl: Duration) -> QueueResult<()> {
        let set = self
            .store
            .set_expiry(&self.record_key(id), ttl)
            .await
            .map_err(QueueError::write("set_expiry"))?;

        if !set {
            return Err(QueueError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn job_type(&self, id: &JobId, op: &'static str) -> QueueResult<String> {
        let raw = self
            .store
            .field_read(&self.record_key(id), fields::TYPE)
            .await
            .map_err(QueueError::read(op))?
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        String::from_utf8(raw)
            .map_err(|_| StoreError::Malformed(format!("field '{}' is not UTF-8", fields::TYPE)))
            .map_err(QueueError::read(op))
    }

    /// Explain why a guarded status change was not applied.
    async fn transition_error(&self, id: &JobId, to: JobStatus, op: &'static str) -> QueueError {
        let current = self
            .store
            .field_read(&self.record_key(id), fields::STATUS)
            .await
            .map_err(QueueError::read(op));

        match current {
            Ok(None) => QueueError::JobNotFound(id.to_string()),
            Ok(Some(raw)) => match parse_status(&raw) {
                Ok(from) => QueueError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to,
                },
                Err(e) => QueueError::read(op)(e),
            },
            Err(e) => e,
        }
    }
}

fn lease_deadline(now: i64, lease: Duration) -> i64 {
    let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
    now.saturating_add(lease_ms)
}

fn field_str(record: &FieldMap, field: &str) -> StoreResult<String> {
    let raw = record
        .get(field)
        .ok_or_else(|| StoreError::Malformed(format!("missing field '{}'", field)))?;
    String::from_utf8(raw.clone())
        .map_err(|_| StoreError::Malformed(format!("field '{}' is not UTF-8", field)))
}

fn parse_i64(field: &str, raw: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::Malformed(format!("field '{}' is not an integer", field)))
}

fn parse_status(raw: &[u8]) -> StoreResult<JobStatus> {
    std::str::from_utf8(raw)
        .map_err(|_| StoreError::Malformed("status is not UTF-8".into()))?
        .parse()
        .map_err(StoreError::Malformed)
}

fn required_i64(record: &FieldMap, field: &str) -> StoreResult<i64> {
    let raw = record
        .get(field)
        .ok_or_else(|| StoreError::Malformed(format!("missing field '{}'", field)))?;
    parse_i64(field, raw)
}

fn decode_job(id: JobId, record: &FieldMap) -> StoreResult<Job> {
    let status = record
        .get(fields::STATUS)
        .ok_or_else(|| StoreError::Malformed(format!("missing field '{}'", fields::STATUS)))
        .and_then(|raw| parse_status(raw))?;

    let attempts = match record.get(fields::ATTEMPTS) {
        Some(raw) => u32::try_from(parse_i64(fields::ATTEMPTS, raw)?)
            .map_err(|_| StoreError::Malformed("attempts out of range".into()))?,
        None => 0,
    };

    let lease_expires_at = record
        .get(fields::LEASE_EXPIRES_AT)
        .map(|raw| parse_i64(fields::LEASE_EXPIRES_AT, raw))
        .transpose()?;

    Ok(Job {
        id,
        job_type: field_str(record, fields::TYPE)?,
        payload: record.get(fields::PAYLOAD).cloned().unwrap_or_default(),
        execution_time: required_i64(record, fields::EXECUTION_TIME)?,
        status,
        created_at: required_i64(record, fields::CREATED_AT)?,
        updated_at: required_i64(record, fields::UPDATED_AT)?,
        attempts,
        lease_expires_at,
    })
}

//! In-memory job store
//!
//! Keeps records and indexes behind a single lock so that batches and claims
//! are atomic. Suitable for tests and single-process deployments; state is
//! lost when the process exits.

use super::{BatchOp, ClaimRequest, FieldMap, JobStore, WriteBatch, fields};
use crate::error::{StoreError, StoreResult};
use crate::job::JobStatus;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Score-ordered set. Equal scores order by member bytes.
#[derive(Debug, Default)]
struct SortedIndex {
    scores: HashMap<String, i64>,
    order: BTreeSet<(i64, String)>,
}

impl SortedIndex {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.order.remove(&(old, member.to_string()));
        }
        self.order.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn range_to(&self, max_score: i64, limit: usize) -> Vec<String> {
        self.order
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, FieldMap>,
    indexes: HashMap<String, SortedIndex>,
    expirations: HashMap<String, Instant>,
}

impl State {
    /// Drop every key whose expiry has passed.
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .expirations
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            trace!(key = %key, "Expiring key");
            self.delete(&key);
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.records.contains_key(key) || self.indexes.contains_key(key)
    }

    fn delete(&mut self, key: &str) -> bool {
        self.expirations.remove(key);
        let record = self.records.remove(key).is_some();
        let index = self.indexes.remove(key).is_some();
        record || index
    }

    fn set_field(&mut self, key: &str, field: &str, value: Vec<u8>) {
        self.records
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    fn remove_field(&mut self, key: &str, field: &str) {
        if let Some(record) = self.records.get_mut(key) {
            record.remove(field);
            // A hash with no fields does not exist.
            if record.is_empty() {
                self.delete(key);
            }
        }
    }

    fn index_insert(&mut self, index: &str, member: &str, score: i64) {
        self.indexes
            .entry(index.to_string())
            .or_default()
            .insert(member, score);
    }

    fn index_remove(&mut self, index: &str, member: &str) -> bool {
        let Some(set) = self.indexes.get_mut(index) else {
            return false;
        };
        let removed = set.remove(member);
        if set.is_empty() {
            self.delete(index);
        }
        removed
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        if !self.exists(key) {
            return false;
        }
        if ttl.is_zero() {
            self.delete(key);
        } else {
            self.expirations.insert(key.to_string(), now + ttl);
        }
        true
    }

    fn apply_op(&mut self, op: BatchOp, now: Instant) {
        match op {
            BatchOp::SetField { key, field, value } => self.set_field(&key, &field, value),
            BatchOp::SetFieldIfAbsent { key, field, value } => {
                let record = self.records.entry(key).or_default();
                record.entry(field).or_insert(value);
            }
            BatchOp::RemoveField { key, field } => self.remove_field(&key, &field),
            BatchOp::IndexInsert {
                index,
                member,
                score,
            } => self.index_insert(&index, &member, score),
            BatchOp::IndexUpdate {
                index,
                member,
                score,
            } => {
                if let Some(set) = self.indexes.get_mut(&index)
                    && set.scores.contains_key(&member)
                {
                    set.insert(&member, score);
                }
            }
            BatchOp::IndexRemove { index, member } => {
                self.index_remove(&index, &member);
            }
            BatchOp::DeleteKey { key } => {
                self.delete(&key);
            }
            BatchOp::Expire { key, ttl } => {
                self.expire(&key, ttl, now);
            }
            BatchOp::Persist { key } => {
                self.expirations.remove(&key);
            }
        }
    }

    fn field_i64(&self, key: &str, field: &str) -> Option<i64> {
        self.records
            .get(key)?
            .get(field)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.parse().ok())
    }
}

/// In-memory job store
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        debug!("Creating new in-memory job store");
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Number of live keys (records and indexes)
    pub fn key_count(&self) -> usize {
        let mut state = self.state.lock();
        state.purge_expired(Instant::now());
        state.records.len() + state.indexes.len()
    }

    /// Remaining time to live of a key, if it has an expiry
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.purge_expired(now);
        state
            .expirations
            .get(key)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Remove every key
    pub fn clear(&self) {
        *self.state.lock() = State::default();
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State, Instant) -> T) -> T {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.purge_expired(now);
        f(&mut state, now)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn field_upsert(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> StoreResult<()> {
        self.with_state(|state, _| {
            for (field, value) in fields {
                state.set_field(key, field, value.clone());
            }
        });
        Ok(())
    }

    async fn field_read_all(&self, key: &str) -> StoreResult<FieldMap> {
        Ok(self.with_state(|state, _| state.records.get(key).cloned().unwrap_or_default()))
    }

    async fn field_read(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.with_state(|state, _| {
            state
                .records
                .get(key)
                .and_then(|record| record.get(field).cloned())
        }))
    }

    async fn key_exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.with_state(|state, _| state.exists(key)))
    }

    async fn key_delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.with_state(|state, _| state.delete(key)))
    }

    async fn sorted_insert(&self, index: &str, member: &str, score: i64) -> StoreResult<()> {
        if self.with_state(|state, _| state.records.contains_key(index)) {
            return Err(StoreError::Backend(format!(
                "key '{}' holds a record, not an index",
                index
            )));
        }
        self.with_state(|state, _| state.index_insert(index, member, score));
        Ok(())
    }

    async fn sorted_range_by_score(
        &self,
        index: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        Ok(self.with_state(|state, _| {
            state
                .indexes
                .get(index)
                .map(|set| set.range_to(max_score, limit))
                .unwrap_or_default()
        }))
    }

    async fn sorted_score(&self, index: &str, member: &str) -> StoreResult<Option<i64>> {
        Ok(self.with_state(|state, _| {
            state
                .indexes
                .get(index)
                .and_then(|set| set.scores.get(member).copied())
        }))
    }

    async fn sorted_remove(&self, index: &str, member: &str) -> StoreResult<bool> {
        Ok(self.with_state(|state, _| state.index_remove(index, member)))
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        Ok(self.with_state(|state, now| state.expire(key, ttl, now)))
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<bool> {
        Ok(self.with_state(|state, now| {
            if let Some(guard) = batch.guard()
                && !guard.admits(state.records.get(&guard.key))
            {
                trace!(key = %guard.key, "Batch guard rejected");
                return false;
            }

            let WriteBatch { ops, .. } = batch;
            for op in ops {
                state.apply_op(op, now);
            }
            true
        }))
    }

    async fn claim_due(&self, claim: ClaimRequest) -> StoreResult<Option<String>> {
        Ok(self.with_state(|state, _| {
            let candidates = state
                .indexes
                .get(&claim.index)
                .map(|set| set.range_to(claim.now, claim.scan_limit))
                .unwrap_or_default();

            for id in candidates {
                let key = format!("{}{}", claim.record_prefix, id);
                let status = state
                    .records
                    .get(&key)
                    .and_then(|record| record.get(fields::STATUS))
                    .and_then(|raw| std::str::from_utf8(raw).ok())
                    .and_then(|s| s.parse::<JobStatus>().ok());

                let claimable = match status {
                    None | Some(JobStatus::Completed) | Some(JobStatus::Failed) => {
                        trace!(index = %claim.index, member = %id, "Dropping stale index entry");
                        state.index_remove(&claim.index, &id);
                        false
                    }
                    Some(JobStatus::Pending) => true,
                    Some(JobStatus::Running) => state
                        .field_i64(&key, fields::LEASE_EXPIRES_AT)
                        .is_none_or(|lease| lease <= claim.now),
                };

                if claimable {
                    let attempts = state.field_i64(&key, fields::ATTEMPTS).unwrap_or(0) + 1;
                    state.set_field(&key, fields::STATUS, JobStatus::Running.as_str().into());
                    state.set_field(&key, fields::ATTEMPTS, attempts.to_string().into_bytes());
                    state.set_field(
                        &key,
                        fields::LEASE_EXPIRES_AT,
                        claim.lease_until.to_string().into_bytes(),
                    );
                    state.set_field(&key, fields::UPDATED_AT, claim.now.to_string().into_bytes());
                    state.index_insert(&claim.index, &id, claim.lease_until);
                    return Some(id);
                }
            }

            None
        }))
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

//! Job store backends
//!
//! A job store is a key-value store with per-key field maps and score-ordered
//! sets. Two backends are provided:
//!
//! - **Memory**: process-local storage (tests, single-process deployments)
//! - **Redis**: shared storage, with compound operations run as Lua scripts

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Field name to raw value.
pub type FieldMap = HashMap<String, Vec<u8>>;

/// Record field names shared by the storage layer and the claim operation.
pub mod fields {
    pub const TYPE: &str = "type";
    pub const PAYLOAD: &str = "payload";
    pub const STATUS: &str = "status";
    pub const EXECUTION_TIME: &str = "execution_time";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const ATTEMPTS: &str = "attempts";
    pub const LEASE_EXPIRES_AT: &str = "lease_expires_at";
}

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set a field on a record
    SetField {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    /// Set a field only if the record does not have it yet
    SetFieldIfAbsent {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    /// Remove a field from a record
    RemoveField { key: String, field: String },
    /// Add a member to an index or change its score
    IndexInsert {
        index: String,
        member: String,
        score: i64,
    },
    /// Change the score of a member that is already indexed
    IndexUpdate {
        index: String,
        member: String,
        score: i64,
    },
    /// Remove a member from an index
    IndexRemove { index: String, member: String },
    /// Delete a key
    DeleteKey { key: String },
    /// Schedule deletion of a key
    Expire { key: String, ttl: Duration },
    /// Clear a pending expiry
    Persist { key: String },
}

/// Precondition checked before a batch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    /// Record that must exist
    pub key: String,
    /// Field inspected when `allowed` is not empty
    pub field: String,
    /// Accepted values of `field`; empty means existence is enough
    pub allowed: Vec<Vec<u8>>,
    /// Whether an absent record also satisfies the guard
    pub allow_missing: bool,
}

impl Guard {
    /// Whether the guard holds for the given record, if any.
    pub fn admits(&self, record: Option<&FieldMap>) -> bool {
        let Some(record) = record else {
            return self.allow_missing;
        };
        if self.allowed.is_empty() {
            return true;
        }
        record
            .get(&self.field)
            .is_some_and(|value| self.allowed.iter().any(|a| a == value))
    }
}

/// An ordered set of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    guard: Option<Guard>,
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only apply if `key` exists.
    pub fn guard_exists(mut self, key: impl Into<String>) -> Self {
        self.guard = Some(Guard {
            key: key.into(),
            field: String::new(),
            allowed: Vec::new(),
            allow_missing: false,
        });
        self
    }

    /// Only apply if `key` exists and `field` holds one of `allowed`.
    pub fn guard_field_in<I, V>(mut self, key: impl Into<String>, field: &str, allowed: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        self.guard = Some(Guard {
            key: key.into(),
            field: field.to_string(),
            allowed: allowed.into_iter().map(Into::into).collect(),
            allow_missing: false,
        });
        self
    }

    /// Only apply if `key` is absent, or exists with `field` in `allowed`.
    pub fn guard_absent_or_field_in<I, V>(
        mut self,
        key: impl Into<String>,
        field: &str,
        allowed: I,
    ) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        self = self.guard_field_in(key, field, allowed);
        if let Some(guard) = self.guard.as_mut() {
            guard.allow_missing = true;
        }
        self
    }

    pub fn set_field(mut self, key: &str, field: &str, value: impl Into<Vec<u8>>) -> Self {
        self.ops.push(BatchOp::SetField {
            key: key.to_string(),
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn set_field_if_absent(
        mut self,
        key: &str,
        field: &str,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.ops.push(BatchOp::SetFieldIfAbsent {
            key: key.to_string(),
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn remove_field(mut self, key: &str, field: &str) -> Self {
        self.ops.push(BatchOp::RemoveField {
            key: key.to_string(),
            field: field.to_string(),
        });
        self
    }

    pub fn index_insert(mut self, index: &str, member: &str, score: i64) -> Self {
        self.ops.push(BatchOp::IndexInsert {
            index: index.to_string(),
            member: member.to_string(),
            score,
        });
        self
    }

    pub fn index_update(mut self, index: &str, member: &str, score: i64) -> Self {
        self.ops.push(BatchOp::IndexUpdate {
            index: index.to_string(),
            member: member.to_string(),
            score,
        });
        self
    }

    pub fn index_remove(mut self, index: &str, member: &str) -> Self {
        self.ops.push(BatchOp::IndexRemove {
            index: index.to_string(),
            member: member.to_string(),
        });
        self
    }

    pub fn delete_key(mut self, key: &str) -> Self {
        self.ops.push(BatchOp::DeleteKey {
            key: key.to_string(),
        });
        self
    }

    pub fn expire(mut self, key: &str, ttl: Duration) -> Self {
        self.ops.push(BatchOp::Expire {
            key: key.to_string(),
            ttl,
        });
        self
    }

    pub fn persist(mut self, key: &str) -> Self {
        self.ops.push(BatchOp::Persist {
            key: key.to_string(),
        });
        self
    }

    /// The precondition, if any.
    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    /// Operations in application order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Parameters of an atomic fetch-and-mark on a dispatch index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    /// Dispatch index to scan
    pub index: String,
    /// Record key for member `m` is `record_prefix + m`
    pub record_prefix: String,
    /// Claim time (ms); only members scored at or below it are eligible
    pub now: i64,
    /// Lease deadline written to the record and used as the new score
    pub lease_until: i64,
    /// Maximum number of index members inspected
    pub scan_limit: usize,
}

/// Storage backend for job records and dispatch indexes.
///
/// Single-key operations are atomic. [`apply`](JobStore::apply) and
/// [`claim_due`](JobStore::claim_due) are atomic across keys.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Set several fields on a record, creating it if needed.
    async fn field_upsert(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> StoreResult<()>;

    /// Read every field of a record; empty when the record is absent.
    async fn field_read_all(&self, key: &str) -> StoreResult<FieldMap>;

    /// Read one field of a record.
    async fn field_read(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Whether a key exists.
    async fn key_exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete a key. Returns whether anything was removed.
    async fn key_delete(&self, key: &str) -> StoreResult<bool>;

    /// Add a member to a sorted index or update its score.
    async fn sorted_insert(&self, index: &str, member: &str, score: i64) -> StoreResult<()>;

    /// Members with score at or below `max_score`, lowest first, at most `limit`.
    async fn sorted_range_by_score(
        &self,
        index: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>>;

    /// Score of a member, if indexed.
    async fn sorted_score(&self, index: &str, member: &str) -> StoreResult<Option<i64>>;

    /// Remove a member. Returns whether it was present.
    async fn sorted_remove(&self, index: &str, member: &str) -> StoreResult<bool>;

    /// Schedule deletion of a key. Returns false if the key does not exist.
    ///
    /// Later field writes do not clear the expiry.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Apply a batch atomically. Returns false, with nothing written, when
    /// the batch guard does not hold.
    async fn apply(&self, batch: WriteBatch) -> StoreResult<bool>;

    /// Claim the next due job on an index.
    ///
    /// A member is claimable when its record is `pending`, or `running` with
    /// a lapsed lease. Members whose record is gone or terminal are dropped
    /// from the index along the way.
    async fn claim_due(&self, claim: ClaimRequest) -> StoreResult<Option<String>>;

    /// Get store type name for debugging
    fn store_type(&self) -> &'static str;
}

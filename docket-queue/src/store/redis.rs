//! Redis job store
//!
//! Records are Redis hashes and dispatch indexes are sorted sets. Batches and
//! claims run as Lua scripts so they are atomic on the server.
//!
//! The scripts touch keys derived from index members, so this store targets a
//! standalone Redis server rather than a cluster.

use super::{BatchOp, ClaimRequest, FieldMap, JobStore, WriteBatch};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use docket_redis::{RedisConfig, RedisService};
use std::time::Duration;
use tracing::{debug, trace};

/// Applies a guarded list of writes.
///
/// ARGV[1] is '1' when a guard is present. A guard uses KEYS[1] and
/// ARGV[2..] = field, allow-missing flag, count, allowed values. Every op
/// then takes the next key and three args: opcode, a, b.
const APPLY_SCRIPT: &str = r#"
        local argi = 2
        local keyi = 1

        if ARGV[1] == '1' then
            local field = ARGV[2]
            local allow_missing = ARGV[3] == '1'
            local nallowed = tonumber(ARGV[4])
            if redis.call('EXISTS', KEYS[1]) == 0 then
                if not allow_missing then
                    return 0
                end
            elseif nallowed > 0 then
                local current = redis.call('HGET', KEYS[1], field)
                local ok = false
                for i = 1, nallowed do
                    if current == ARGV[4 + i] then
                        ok = true
                        break
                    end
                end
                if not ok then
                    return 0
                end
            end
            argi = 5 + nallowed
            keyi = 2
        end

        while argi <= #ARGV do
            local op, a, b = ARGV[argi], ARGV[argi + 1], ARGV[argi + 2]
            local key = KEYS[keyi]
            if op == 'hset' then
                redis.call('HSET', key, a, b)
            elseif op == 'hsetnx' then
                redis.call('HSETNX', key, a, b)
            elseif op == 'hdel' then
                redis.call('HDEL', key, a)
            elseif op == 'zadd' then
                redis.call('ZADD', key, b, a)
            elseif op == 'zaddxx' then
                redis.call('ZADD', key, 'XX', b, a)
            elseif op == 'zrem' then
                redis.call('ZREM', key, a)
            elseif op == 'del' then
                redis.call('DEL', key)
            elseif op == 'pexpire' then
                redis.call('PEXPIRE', key, a)
            elseif op == 'persist' then
                redis.call('PERSIST', key)
            else
                return redis.error_reply('unknown batch op ' .. op)
            end
            argi = argi + 3
            keyi = keyi + 1
        end

        return 1
        "#;

/// Claims the first due member of KEYS[1].
///
/// ARGV = record prefix, now, lease deadline, scan limit.
const CLAIM_SCRIPT: &str = r#"
        local index = KEYS[1]
        local prefix = ARGV[1]
        local now = tonumber(ARGV[2])
        local lease_until = ARGV[3]

        local members = redis.call('ZRANGEBYSCORE', index, '-inf', ARGV[2], 'LIMIT', 0, ARGV[4])
        for _, id in ipairs(members) do
            local key = prefix .. id
            local status = redis.call('HGET', key, 'status')
            local claimable = false

            if status == 'pending' then
                claimable = true
            elseif status == 'running' then
                local lease = tonumber(redis.call('HGET', key, 'lease_expires_at'))
                claimable = (lease == nil) or (lease <= now)
            else
                redis.call('ZREM', index, id)
            end

            if claimable then
                redis.call('HSET', key, 'status', 'running', 'lease_expires_at', lease_until, 'updated_at', ARGV[2])
                redis.call('HINCRBY', key, 'attempts', 1)
                redis.call('ZADD', index, lease_until, id)
                return id
            end
        end

        return false
        "#;

/// Redis-backed job store
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct RedisStore {
    redis: RedisService,
}

impl RedisStore {
    /// Create a store on top of an existing service.
    pub fn new(redis: RedisService) -> Self {
        Self { redis }
    }

    /// Open a pool and create a store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or Redis is
    /// unreachable.
    pub async fn connect(config: RedisConfig) -> StoreResult<Self> {
        debug!(url = %config.redacted_url(), "Connecting job store to Redis");
        let redis = RedisService::new(config).await?;
        Ok(Self::new(redis))
    }

    /// The underlying Redis service.
    pub fn service(&self) -> &RedisService {
        &self.redis
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> StoreResult<T> {
        Ok(self.redis.query(cmd).await?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Append one op to a script invocation as (key, opcode, a, b).
fn push_op(invocation: &mut redis::ScriptInvocation<'_>, op: &BatchOp) {
    match op {
        BatchOp::SetField { key, field, value } => {
            invocation.key(key).arg("hset").arg(field).arg(value.as_slice());
        }
        BatchOp::SetFieldIfAbsent { key, field, value } => {
            invocation.key(key).arg("hsetnx").arg(field).arg(value.as_slice());
        }
        BatchOp::RemoveField { key, field } => {
            invocation.key(key).arg("hdel").arg(field).arg("");
        }
        BatchOp::IndexInsert {
            index,
            member,
            score,
        } => {
            invocation.key(index).arg("zadd").arg(member).arg(*score);
        }
        BatchOp::IndexUpdate {
            index,
            member,
            score,
        } => {
            invocation.key(index).arg("zaddxx").arg(member).arg(*score);
        }
        BatchOp::IndexRemove { index, member } => {
            invocation.key(index).arg("zrem").arg(member).arg("");
        }
        BatchOp::DeleteKey { key } => {
            invocation.key(key).arg("del").arg("").arg("");
        }
        BatchOp::Expire { key, ttl } => {
            invocation
                .key(key)
                .arg("pexpire")
                .arg(ttl_millis(*ttl))
                .arg("");
        }
        BatchOp::Persist { key } => {
            invocation.key(key).arg("persist").arg("").arg("");
        }
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn field_upsert(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        trace!(key = %key, count = fields.len(), "Redis HSET");

        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value.as_slice());
        }
        let _: i64 = self.query(&cmd).await?;
        Ok(())
    }

    async fn field_read_all(&self, key: &str) -> StoreResult<FieldMap> {
        self.query(redis::cmd("HGETALL").arg(key)).await
    }

    async fn field_read(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.query(redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn key_exists(&self, key: &str) -> StoreResult<bool> {
        let count: i64 = self.query(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn key_delete(&self, key: &str) -> StoreResult<bool> {
        let count: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(count > 0)
    }

    async fn sorted_insert(&self, index: &str, member: &str, score: i64) -> StoreResult<()> {
        let _: i64 = self
            .query(redis::cmd("ZADD").arg(index).arg(score).arg(member))
            .await?;
        Ok(())
    }

    async fn sorted_range_by_score(
        &self,
        index: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        self.query(
            redis::cmd("ZRANGEBYSCORE")
                .arg(index)
                .arg("-inf")
                .arg(max_score)
                .arg("LIMIT")
                .arg(0)
                .arg(limit),
        )
        .await
    }

    async fn sorted_score(&self, index: &str, member: &str) -> StoreResult<Option<i64>> {
        let score: Option<f64> = self
            .query(redis::cmd("ZSCORE").arg(index).arg(member))
            .await?;
        Ok(score.map(|s| s as i64))
    }

    async fn sorted_remove(&self, index: &str, member: &str) -> StoreResult<bool> {
        let removed: i64 = self
            .query(redis::cmd("ZREM").arg(index).arg(member))
            .await?;
        Ok(removed > 0)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let set: i64 = self
            .query(redis::cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)))
            .await?;
        Ok(set == 1)
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<bool> {
        if batch.guard().is_none() && batch.is_empty() {
            return Ok(true);
        }

        let script = redis::Script::new(APPLY_SCRIPT);
        let mut invocation = script.prepare_invoke();
        match batch.guard() {
            Some(guard) => {
                invocation
                    .key(&guard.key)
                    .arg("1")
                    .arg(&guard.field)
                    .arg(if guard.allow_missing { "1" } else { "0" })
                    .arg(guard.allowed.len());
                for value in &guard.allowed {
                    invocation.arg(value.as_slice());
                }
            }
            None => {
                invocation.arg("0");
            }
        }
        for op in batch.ops() {
            push_op(&mut invocation, op);
        }

        let applied: i64 = self.redis.invoke(&invocation).await?;
        trace!(ops = batch.len(), applied = applied == 1, "Redis batch applied");
        Ok(applied == 1)
    }

    async fn claim_due(&self, claim: ClaimRequest) -> StoreResult<Option<String>> {
        if claim.scan_limit == 0 {
            return Err(StoreError::Backend("claim scan limit must be positive".into()));
        }

        let script = redis::Script::new(CLAIM_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&claim.index)
            .arg(&claim.record_prefix)
            .arg(claim.now)
            .arg(claim.lease_until)
            .arg(claim.scan_limit);

        let claimed: Option<String> = self.redis.invoke(&invocation).await?;
        trace!(index = %claim.index, claimed = ?claimed, "Redis claim");
        Ok(claimed)
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fields;

    async fn store() -> RedisStore {
        RedisStore::connect(RedisConfig::from_env().build())
            .await
            .unwrap()
    }

    fn unique(name: &str) -> String {
        format!("docket:test:{}:{}", name, uuid::Uuid::new_v4())
    }

    #[test]
    fn test_ttl_millis_saturates() {
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2_000);
        assert_eq!(ttl_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_fields_and_index() {
        let store = store().await;
        let key = unique("record");
        let index = unique("index");

        store
            .field_upsert(&key, &[(fields::STATUS, b"pending".to_vec())])
            .await
            .unwrap();
        assert!(store.key_exists(&key).await.unwrap());
        assert_eq!(
            store.field_read(&key, fields::STATUS).await.unwrap().unwrap(),
            b"pending"
        );

        store.sorted_insert(&index, "b", 10).await.unwrap();
        store.sorted_insert(&index, "a", 10).await.unwrap();
        assert_eq!(
            store.sorted_range_by_score(&index, 10, 5).await.unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(store.sorted_score(&index, "a").await.unwrap(), Some(10));

        assert!(store.key_delete(&key).await.unwrap());
        assert!(store.key_delete(&index).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_guarded_batch() {
        let store = store().await;
        let key = unique("record");

        let rejected = WriteBatch::new()
            .guard_exists(&key)
            .set_field(&key, fields::STATUS, "running");
        assert!(!store.apply(rejected).await.unwrap());
        assert!(!store.key_exists(&key).await.unwrap());

        store
            .field_upsert(&key, &[(fields::STATUS, b"pending".to_vec())])
            .await
            .unwrap();
        let accepted = WriteBatch::new()
            .guard_field_in(&key, fields::STATUS, ["pending"])
            .set_field(&key, fields::STATUS, "completed")
            .expire(&key, Duration::from_secs(60));
        assert!(store.apply(accepted).await.unwrap());
        assert_eq!(
            store.field_read(&key, fields::STATUS).await.unwrap().unwrap(),
            b"completed"
        );

        store.key_delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_guard_allows_missing_record() {
        let store = store().await;
        let key = unique("record");

        let create = WriteBatch::new()
            .guard_absent_or_field_in(&key, fields::STATUS, ["pending"])
            .set_field(&key, fields::STATUS, "pending");
        assert!(store.apply(create).await.unwrap());

        store
            .field_upsert(&key, &[(fields::STATUS, b"running".to_vec())])
            .await
            .unwrap();
        let overwrite = WriteBatch::new()
            .guard_absent_or_field_in(&key, fields::STATUS, ["pending"])
            .set_field(&key, fields::STATUS, "pending");
        assert!(!store.apply(overwrite).await.unwrap());
        assert_eq!(
            store.field_read(&key, fields::STATUS).await.unwrap().unwrap(),
            b"running"
        );

        store.key_delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_claim_due() {
        let store = store().await;
        let prefix = format!("{}:", unique("job"));
        let index = unique("queue");
        let key = format!("{}1", prefix);

        store
            .field_upsert(&key, &[(fields::STATUS, b"pending".to_vec())])
            .await
            .unwrap();
        store.sorted_insert(&index, "1", 100).await.unwrap();
        store.sorted_insert(&index, "ghost", 50).await.unwrap();

        let claim = ClaimRequest {
            index: index.clone(),
            record_prefix: prefix,
            now: 200,
            lease_until: 1_200,
            scan_limit: 10,
        };
        assert_eq!(
            store.claim_due(claim.clone()).await.unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(store.sorted_score(&index, "ghost").await.unwrap(), None);
        assert_eq!(store.sorted_score(&index, "1").await.unwrap(), Some(1_200));
        assert_eq!(
            store.field_read(&key, fields::ATTEMPTS).await.unwrap().unwrap(),
            b"1"
        );
        assert_eq!(store.claim_due(claim).await.unwrap(), None);

        store.key_delete(&key).await.unwrap();
        store.key_delete(&index).await.unwrap();
    }
}

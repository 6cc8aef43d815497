use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use snip_core::cache::Result;
use snip_core::{
    CacheError, DedupKey, ResponseCache, ShortCode, UrlCache, UrlEntity, UrlResponse,
};
use std::time::Duration;
use tracing::{debug, trace, warn};

const SCAN_BATCH: usize = 100;

/// A Redis-based implementation of both cache keyspaces.
///
/// Values are stored as JSON strings with a millisecond expiry. Entities live
/// under `{namespace}url:{code}` and responses under
/// `{namespace}response:{dedup key}`.
#[derive(Clone)]
pub struct RedisUrlCache {
    conn: MultiplexedConnection,
    namespace: String,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> CacheError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() {
        CacheError::Timeout(message)
    } else if err.is_connection_dropped() || err.is_io_error() {
        CacheError::Unavailable(message)
    } else {
        CacheError::Operation(message)
    }
}

/// Escapes glob metacharacters so a literal prefix can be used in `SCAN MATCH`.
fn escape_glob(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

impl RedisUrlCache {
    /// Creates a new Redis cache without a namespace.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self::with_namespace(conn, "")
    }

    /// Creates a new Redis cache whose keys all start with `namespace`
    /// (e.g. `"snip:"`).
    pub fn with_namespace(conn: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    fn entity_key(&self, code: &str) -> String {
        format!("{}url:{}", self.namespace, code)
    }

    fn response_key(&self, key: &DedupKey) -> String {
        format!("{}response:{}", self.namespace, key.as_str())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let cached = conn
            .get::<_, Option<String>>(key)
            .await
            .map_err(|e| map_redis_error("failed to fetch value from Redis", e))?;

        match cached {
            Some(cached) => match serde_json::from_str::<T>(&cached) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, error = %e, "Failed to deserialize cached value");
                    Err(CacheError::InvalidData(format!(
                        "invalid cached value for key '{key}': {e}"
                    )))
                }
            },
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();

        // PSETEX rejects a zero expiry; a zero TTL means "do not cache".
        if ttl.is_zero() {
            return conn
                .del::<_, ()>(key)
                .await
                .map_err(|e| map_redis_error("failed to delete value from Redis", e));
        }

        let json = serde_json::to_string(value).map_err(|e| {
            CacheError::Serialization(format!("failed to serialize cache value: {e}"))
        })?;

        conn.pset_ex::<_, _, ()>(key, json, ttl_millis(ttl))
            .await
            .map_err(|e| map_redis_error("failed to write value to Redis", e))
    }

    async fn del_key(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| map_redis_error("failed to delete value from Redis", e))
    }
}

#[async_trait]
impl UrlCache for RedisUrlCache {
    async fn get_url(&self, code: &ShortCode) -> Result<Option<UrlEntity>> {
        trace!(code = %code, "Fetching URL entity from Redis cache");

        let entity = self
            .get_json::<UrlEntity>(&self.entity_key(code.as_str()))
            .await
            .inspect_err(|e| warn!(code = %code, error = %e, "Redis error on get"))?;

        match &entity {
            Some(_) => debug!(code = %code, "Cache hit in Redis"),
            None => trace!(code = %code, "Cache miss in Redis"),
        }
        Ok(entity)
    }

    async fn set_url(&self, code: &ShortCode, entity: &UrlEntity, ttl: Duration) -> Result<()> {
        trace!(code = %code, "Storing URL entity in Redis cache");

        self.set_json(&self.entity_key(code.as_str()), entity, ttl)
            .await
            .inspect_err(|e| warn!(code = %code, error = %e, "Failed to cache entity in Redis"))?;
        debug!(code = %code, "Cached entity in Redis");
        Ok(())
    }

    async fn del(&self, code: &ShortCode) -> Result<()> {
        trace!(code = %code, "Removing URL entity from Redis cache");

        self.del_key(&self.entity_key(code.as_str()))
            .await
            .inspect_err(|e| warn!(code = %code, error = %e, "Failed to remove entity from Redis"))
    }

    async fn invalidate(&self, prefix: &str) -> Result<()> {
        let pattern = format!("{}*", escape_glob(&self.entity_key(prefix)));
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0_usize;

        loop {
            let (next, keys) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await
                .map_err(|e| map_redis_error("failed to scan Redis keys", e))?;

            if !keys.is_empty() {
                removed += keys.len();
                conn.del::<_, ()>(&keys)
                    .await
                    .map_err(|e| map_redis_error("failed to delete scanned keys", e))?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "Invalidated Redis entries by prefix");
        Ok(())
    }
}

#[async_trait]
impl ResponseCache for RedisUrlCache {
    async fn get_response(&self, key: &DedupKey) -> Result<Option<UrlResponse>> {
        self.get_json(&self.response_key(key)).await
    }

    async fn set_response(
        &self,
        key: &DedupKey,
        response: &UrlResponse,
        ttl: Duration,
    ) -> Result<()> {
        self.set_json(&self.response_key(key), response, ttl).await
    }

    async fn del_response(&self, key: &DedupKey) -> Result<()> {
        self.del_key(&self.response_key(key)).await
    }
}

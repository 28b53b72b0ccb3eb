//! Tolerant cache façade.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use super::{CacheBackend, KeyTtl, Ttl};
use crate::{StorageError, StorageResult};

/// Tolerant client over a [`CacheBackend`].
///
/// Cache outages never propagate: each failure is logged at `warn` and the
/// call returns `false`, `0`, `None` or an empty collection instead. The only
/// errors surfaced are caller mistakes, such as a negative delta passed to
/// [`incr`](Self::incr).
///
/// The `*_with_ttl` variants write and then set the key's expiry in a second
/// step; [`Ttl::Persist`] clears any existing expiry.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use microbase_storage::cache::{CacheClient, MemoryCache, Ttl};
///
/// #[tokio::main]
/// async fn main() {
///     let cache = CacheClient::new(Arc::new(MemoryCache::new()));
///
///     assert!(cache.set_with_ttl("greeting", "hello", Ttl::Seconds(60)).await);
///     assert_eq!(cache.get("greeting").await.as_deref(), Some("hello"));
///     assert_eq!(cache.incr("visits", 2).await.unwrap(), Some(2));
/// }
/// ```
#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient").finish_non_exhaustive()
    }
}

/// Logs a failed cache call and substitutes `fallback`.
fn tolerate<T>(op: &'static str, key: &str, result: StorageResult<T>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            warn!(op, key, error = %error, transient = error.is_transient(), "cache operation failed");
            fallback
        },
    }
}

fn reject_negative<N: PartialOrd + Default + fmt::Display>(op: &str, delta: N) -> StorageResult<()> {
    if delta < N::default() {
        return Err(StorageError::validation(format!("{op} delta must not be negative, got {delta}")));
    }
    Ok(())
}

fn reject_non_finite(op: &str, delta: f64) -> StorageResult<()> {
    if !delta.is_finite() {
        return Err(StorageError::validation(format!("{op} delta must be finite, got {delta}")));
    }
    reject_negative(op, delta)
}

fn owned<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    items.iter().map(|item| item.as_ref().to_owned()).collect()
}

impl CacheClient {
    /// Wraps a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// The underlying strict backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    async fn apply_ttl(&self, op: &'static str, key: &str, ttl: Ttl) -> bool {
        let result = match ttl.as_duration() {
            Some(duration) => self.backend.expire(key, duration).await,
            None => self.backend.persist(key).await.map(|_| true),
        };
        tolerate(op, key, result, false)
    }

    // Keys

    /// Sets a key's expiry. [`Ttl::Persist`] clears it.
    ///
    /// Returns `false` if the key does not exist or the cache failed.
    pub async fn expire(&self, key: &str, ttl: Ttl) -> bool {
        self.apply_ttl("expire", key, ttl).await
    }

    /// Remaining lifetime of `key`, `None` if the cache failed.
    pub async fn ttl(&self, key: &str) -> Option<KeyTtl> {
        tolerate("ttl", key, self.backend.ttl(key).await.map(Some), None)
    }

    /// Returns whether `key` exists; `false` on failure.
    pub async fn exists(&self, key: &str) -> bool {
        tolerate("exists", key, self.backend.exists(key).await, false)
    }

    /// Deletes keys. Returns `true` once the cache has processed the delete,
    /// whether or not the keys existed.
    pub async fn delete<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        if keys.is_empty() {
            return true;
        }
        let keys = owned(keys);
        let label = keys.join(",");
        tolerate("delete", &label, self.backend.delete(&keys).await.map(|_| true), false)
    }

    // Strings

    /// Returns the string at `key`, `None` if absent or the cache failed.
    pub async fn get(&self, key: &str) -> Option<String> {
        tolerate("get", key, self.backend.get(key).await, None)
    }

    /// Returns the JSON value at `key` decoded as `T`.
    ///
    /// A payload that does not decode is logged and treated as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        tolerate("get_json", key, serde_json::from_str(&raw).map(Some).map_err(StorageError::from), None)
    }

    /// Stores a string without expiry.
    pub async fn set(&self, key: &str, value: impl Into<String>) -> bool {
        self.set_with_ttl(key, value, Ttl::Persist).await
    }

    /// Stores a string with the given expiry.
    pub async fn set_with_ttl(&self, key: &str, value: impl Into<String>, ttl: Ttl) -> bool {
        tolerate("set", key, self.backend.set(key, value.into(), ttl).await.map(|()| true), false)
    }

    /// Stores `value` encoded as JSON.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Ttl) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_with_ttl(key, raw, ttl).await,
            Err(error) => tolerate("set_json", key, Err(StorageError::from(error)), false),
        }
    }

    /// Adds `delta` to the counter at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for a negative `delta`, without
    /// touching the cache. A cache failure yields `Ok(None)`.
    #[tracing::instrument(skip(self))]
    pub async fn incr(&self, key: &str, delta: i64) -> StorageResult<Option<i64>> {
        reject_negative("incr", delta)?;
        Ok(tolerate("incr", key, self.backend.incr_by(key, delta).await.map(Some), None))
    }

    /// Subtracts `delta` from the counter at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for a negative `delta`, without
    /// touching the cache. A cache failure yields `Ok(None)`.
    #[tracing::instrument(skip(self))]
    pub async fn decr(&self, key: &str, delta: i64) -> StorageResult<Option<i64>> {
        reject_negative("decr", delta)?;
        Ok(tolerate("decr", key, self.backend.incr_by(key, -delta).await.map(Some), None))
    }

    /// Acquires a best-effort lock: a single set-if-absent of `key` with the
    /// given hold time.
    ///
    /// Returns `true` only if this call created the key.
    #[tracing::instrument(skip(self))]
    pub async fn lock(&self, key: &str, hold: Duration) -> bool {
        let stamp = chrono::Utc::now().timestamp_millis().to_string();
        tolerate("lock", key, self.backend.set_if_absent(key, stamp, Ttl::from(hold)).await, false)
    }

    /// Releases a lock taken with [`lock`](Self::lock).
    #[tracing::instrument(skip(self))]
    pub async fn unlock(&self, key: &str) -> bool {
        self.delete(&[key]).await
    }

    // Hashes

    /// Returns one hash field.
    pub async fn hash_get(&self, key: &str, field: &str) -> Option<String> {
        tolerate("hash_get", key, self.backend.hget(key, field).await, None)
    }

    /// Returns every field of a hash; empty if absent or the cache failed.
    pub async fn hash_get_all(&self, key: &str) -> HashMap<String, String> {
        tolerate("hash_get_all", key, self.backend.hgetall(key).await, HashMap::new())
    }

    /// Sets one hash field.
    pub async fn hash_set(&self, key: &str, field: &str, value: impl Into<String>) -> bool {
        tolerate("hash_set", key, self.backend.hset(key, field, value.into()).await.map(|()| true), false)
    }

    /// Sets one hash field, then the key's expiry.
    pub async fn hash_set_with_ttl(
        &self,
        key: &str,
        field: &str,
        value: impl Into<String>,
        ttl: Ttl,
    ) -> bool {
        self.hash_set(key, field, value).await && self.apply_ttl("hash_set", key, ttl).await
    }

    /// Sets several hash fields.
    pub async fn hash_set_all(&self, key: &str, entries: HashMap<String, String>) -> bool {
        tolerate("hash_set_all", key, self.backend.hset_all(key, entries).await.map(|()| true), false)
    }

    /// Sets several hash fields, then the key's expiry.
    pub async fn hash_set_all_with_ttl(
        &self,
        key: &str,
        entries: HashMap<String, String>,
        ttl: Ttl,
    ) -> bool {
        self.hash_set_all(key, entries).await && self.apply_ttl("hash_set_all", key, ttl).await
    }

    /// Removes hash fields. Returns how many existed.
    pub async fn hash_delete<S: AsRef<str>>(&self, key: &str, fields: &[S]) -> u64 {
        tolerate("hash_delete", key, self.backend.hdel(key, &owned(fields)).await, 0)
    }

    /// Returns whether a hash field exists.
    pub async fn hash_exists(&self, key: &str, field: &str) -> bool {
        tolerate("hash_exists", key, self.backend.hexists(key, field).await, false)
    }

    /// Adds `delta` to a numeric hash field.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for a negative or non-finite
    /// `delta`, without touching the cache. A cache failure yields `Ok(None)`.
    #[tracing::instrument(skip(self))]
    pub async fn hash_incr(&self, key: &str, field: &str, delta: f64) -> StorageResult<Option<f64>> {
        reject_non_finite("hash_incr", delta)?;
        Ok(tolerate("hash_incr", key, self.backend.hincr_by_float(key, field, delta).await.map(Some), None))
    }

    /// Subtracts `delta` from a numeric hash field.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for a negative or non-finite
    /// `delta`, without touching the cache. A cache failure yields `Ok(None)`.
    #[tracing::instrument(skip(self))]
    pub async fn hash_decr(&self, key: &str, field: &str, delta: f64) -> StorageResult<Option<f64>> {
        reject_non_finite("hash_decr", delta)?;
        Ok(tolerate("hash_decr", key, self.backend.hincr_by_float(key, field, -delta).await.map(Some), None))
    }

    // Sets

    /// Adds members. Returns how many were new.
    pub async fn set_add<S: AsRef<str>>(&self, key: &str, members: &[S]) -> u64 {
        tolerate("set_add", key, self.backend.sadd(key, &owned(members)).await, 0)
    }

    /// Adds members, then sets the key's expiry.
    pub async fn set_add_with_ttl<S: AsRef<str>>(&self, key: &str, members: &[S], ttl: Ttl) -> u64 {
        let added = self.set_add(key, members).await;
        self.apply_ttl("set_add", key, ttl).await;
        added
    }

    /// Returns every member; empty if absent or the cache failed.
    pub async fn set_members(&self, key: &str) -> HashSet<String> {
        tolerate("set_members", key, self.backend.smembers(key).await, HashSet::new())
    }

    /// Returns whether `member` is in the set.
    pub async fn set_is_member(&self, key: &str, member: &str) -> bool {
        tolerate("set_is_member", key, self.backend.sismember(key, member).await, false)
    }

    /// Number of members.
    pub async fn set_size(&self, key: &str) -> u64 {
        tolerate("set_size", key, self.backend.scard(key).await, 0)
    }

    /// Removes members. Returns how many existed.
    pub async fn set_remove<S: AsRef<str>>(&self, key: &str, members: &[S]) -> u64 {
        tolerate("set_remove", key, self.backend.srem(key, &owned(members)).await, 0)
    }

    // Lists

    /// Appends one value. Returns the new length, `0` on failure.
    pub async fn list_push(&self, key: &str, value: impl Into<String>) -> u64 {
        tolerate("list_push", key, self.backend.rpush(key, &[value.into()]).await, 0)
    }

    /// Appends one value, then sets the key's expiry.
    pub async fn list_push_with_ttl(&self, key: &str, value: impl Into<String>, ttl: Ttl) -> u64 {
        let len = self.list_push(key, value).await;
        if len > 0 {
            self.apply_ttl("list_push", key, ttl).await;
        }
        len
    }

    /// Appends values in order.
    pub async fn list_push_all<S: AsRef<str>>(&self, key: &str, values: &[S]) -> u64 {
        tolerate("list_push_all", key, self.backend.rpush(key, &owned(values)).await, 0)
    }

    /// Appends values in order, then sets the key's expiry.
    pub async fn list_push_all_with_ttl<S: AsRef<str>>(&self, key: &str, values: &[S], ttl: Ttl) -> u64 {
        let len = self.list_push_all(key, values).await;
        if len > 0 {
            self.apply_ttl("list_push_all", key, ttl).await;
        }
        len
    }

    /// Prepends one value.
    pub async fn list_push_front(&self, key: &str, value: impl Into<String>) -> u64 {
        tolerate("list_push_front", key, self.backend.lpush(key, &[value.into()]).await, 0)
    }

    /// Returns the inclusive range `start..=stop`; `0, -1` is the whole list.
    pub async fn list_range(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        tolerate("list_range", key, self.backend.lrange(key, start, stop).await, Vec::new())
    }

    /// List length.
    pub async fn list_size(&self, key: &str) -> u64 {
        tolerate("list_size", key, self.backend.llen(key).await, 0)
    }

    /// Returns the element at `index`; negative indexes count from the tail.
    pub async fn list_index(&self, key: &str, index: i64) -> Option<String> {
        tolerate("list_index", key, self.backend.lindex(key, index).await, None)
    }

    /// Replaces the element at `index`. `false` when out of range.
    pub async fn list_update_index(&self, key: &str, index: i64, value: impl Into<String>) -> bool {
        tolerate("list_update_index", key, self.backend.lset(key, index, value.into()).await.map(|()| true), false)
    }

    /// Removes occurrences of `value`; see [`CacheBackend::lrem`].
    pub async fn list_remove(&self, key: &str, count: i64, value: &str) -> u64 {
        tolerate("list_remove", key, self.backend.lrem(key, count, value).await, 0)
    }

    /// Removes and returns the head.
    pub async fn list_left_pop(&self, key: &str) -> Option<String> {
        tolerate("list_left_pop", key, self.backend.lpop(key).await, None)
    }

    /// Removes and returns the tail.
    pub async fn list_right_pop(&self, key: &str) -> Option<String> {
        tolerate("list_right_pop", key, self.backend.rpop(key).await, None)
    }

    /// Keeps only the inclusive range `start..=stop`.
    pub async fn list_trim(&self, key: &str, start: i64, stop: i64) -> bool {
        tolerate("list_trim", key, self.backend.ltrim(key, start, stop).await.map(|()| true), false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn client() -> (CacheClient, MemoryCache) {
        let backend = MemoryCache::new();
        (CacheClient::new(Arc::new(backend.clone())), backend)
    }

    #[tokio::test]
    async fn test_negative_delta_rejected_without_write() {
        let (cache, backend) = client();
        assert!(matches!(cache.incr("n", -1).await, Err(StorageError::Validation { .. })));
        assert!(cache.decr("n", -1).await.is_err());
        assert!(cache.hash_incr("h", "f", -0.5).await.is_err());
        assert!(cache.hash_decr("h", "f", -0.5).await.is_err());
        assert_eq!(backend.stored_keys(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_hash_delta_rejected_without_write() {
        let (cache, backend) = client();
        for delta in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(cache.hash_incr("h", "f", delta).await, Err(StorageError::Validation { .. })));
            assert!(matches!(cache.hash_decr("h", "f", delta).await, Err(StorageError::Validation { .. })));
        }
        assert_eq!(backend.stored_keys(), 0);
    }

    #[tokio::test]
    async fn test_counters() {
        let (cache, _) = client();
        assert_eq!(cache.incr("n", 5).await.unwrap(), Some(5));
        assert_eq!(cache.decr("n", 2).await.unwrap(), Some(3));
        assert_eq!(cache.hash_incr("h", "f", 1.25).await.unwrap(), Some(1.25));
        assert_eq!(cache.hash_decr("h", "f", 0.25).await.unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn test_counter_on_text_value_downgrades() {
        let (cache, _) = client();
        cache.set("n", "not a number").await;
        assert_eq!(cache.incr("n", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_unlocked() {
        let (cache, _) = client();
        assert!(cache.lock("job", Duration::from_secs(30)).await);
        assert!(!cache.lock("job", Duration::from_secs(30)).await);
        assert!(cache.unlock("job").await);
        assert!(cache.lock("job", Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_expires() {
        let (cache, _) = client();
        assert!(cache.lock("job", Duration::from_secs(2)).await);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.lock("job", Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_persist_ttl_clears_expiry() {
        let (cache, _) = client();
        cache.set_with_ttl("k", "v", Ttl::Seconds(10)).await;
        assert!(matches!(cache.ttl("k").await, Some(KeyTtl::Expires(_))));
        assert!(cache.expire("k", Ttl::from_wire(-1).unwrap()).await);
        assert_eq!(cache.ttl("k").await, Some(KeyTtl::Persistent));
    }

    #[tokio::test]
    async fn test_with_ttl_variants_set_expiry() {
        let (cache, _) = client();
        assert!(cache.hash_set_with_ttl("h", "f", "v", Ttl::Seconds(5)).await);
        assert_eq!(cache.set_add_with_ttl("s", &["a", "b"], Ttl::Seconds(5)).await, 2);
        assert_eq!(cache.list_push_all_with_ttl("l", &["a", "b"], Ttl::Seconds(5)).await, 2);
        for key in ["h", "s", "l"] {
            assert!(matches!(cache.ttl(key).await, Some(KeyTtl::Expires(_))), "{key}");
        }
    }

    #[tokio::test]
    async fn test_json_roundtrip_and_bad_payload() {
        let (cache, _) = client();
        assert!(cache.set_json("j", &vec![1, 2, 3], Ttl::Persist).await);
        assert_eq!(cache.get_json::<Vec<i32>>("j").await, Some(vec![1, 2, 3]));

        cache.set("bad", "{not json").await;
        assert_eq!(cache.get_json::<Vec<i32>>("bad").await, None);
    }

    #[tokio::test]
    async fn test_wrong_type_downgrades() {
        let (cache, _) = client();
        cache.set("k", "v").await;
        assert_eq!(cache.list_push("k", "x").await, 0);
        assert!(cache.hash_get_all("k").await.is_empty());
        assert!(!cache.list_update_index("k", 0, "x").await);
    }

    #[tokio::test]
    async fn test_list_helpers() {
        let (cache, _) = client();
        cache.list_push_all("l", &["a", "b", "c"]).await;
        cache.list_push_front("l", "z").await;
        assert_eq!(cache.list_range("l", 0, -1).await, vec!["z", "a", "b", "c"]);
        assert!(cache.list_update_index("l", -1, "d").await);
        assert_eq!(cache.list_index("l", -1).await.as_deref(), Some("d"));
        assert_eq!(cache.list_remove("l", 0, "a").await, 1);
        assert!(cache.list_trim("l", 0, 1).await);
        assert_eq!(cache.list_size("l").await, 2);
    }
}

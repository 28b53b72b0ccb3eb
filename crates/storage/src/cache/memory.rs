//! In-memory cache backend.
//!
//! [`MemoryCache`] implements [`CacheBackend`] over a single keyspace guarded
//! by a [`parking_lot::RwLock`]. It is meant for tests and single-process
//! deployments.
//!
//! Expired keys are invisible as soon as their deadline passes. A background
//! task also sweeps them on [`CacheConfig::cleanup_interval`] so that memory
//! is released for keys nobody reads again. Deadlines use
//! [`tokio::time::Instant`], so tests can drive expiry with a paused clock.
//!
//! Collections follow cache semantics: a hash, set or list that becomes empty
//! is removed together with its key.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;
use tokio::{
    select,
    sync::watch,
    time::{Instant, sleep},
};

use super::{CacheBackend, KeyTtl, Ttl};
use crate::{CacheConfig, StorageError, StorageResult};

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the sweep task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Best-effort; the task may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

impl Value {
    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::Hash(hash) => hash.is_empty(),
            Self::Set(set) => set.is_empty(),
            Self::List(list) => list.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = HashMap<String, Slot>;

/// In-memory [`CacheBackend`].
///
/// Cloning is cheap; all clones share one keyspace. The sweep task stops when
/// the last clone is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct MemoryCache {
    data: Arc<RwLock<Keyspace>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryCache {
    /// Creates an empty cache with the default sweep interval.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Creates an empty cache sweeping expired keys every
    /// `config.cleanup_interval()`.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn with_config(config: &CacheConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let data = Arc::new(RwLock::new(Keyspace::new()));

        tokio::spawn(sweep_expired(Arc::clone(&data), config.cleanup_interval(), shutdown_rx));

        Self { data, shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }) }
    }

    /// Stops the sweep task. Expired keys stay invisible to reads.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Number of stored keys, including expired keys not yet swept.
    #[must_use]
    pub fn stored_keys(&self) -> usize {
        self.data.read().len()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache").field("stored_keys", &self.stored_keys()).finish()
    }
}

async fn sweep_expired(
    data: Arc<RwLock<Keyspace>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(interval) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Instant::now();
        data.write().retain(|_, slot| !slot.is_expired(now));
    }
}

fn available() -> StorageResult<()> {
    fail_point!("cache-unavailable", |_| {
        Err(StorageError::unavailable("injected cache outage"))
    });
    Ok(())
}

fn live<'a>(keyspace: &'a Keyspace, key: &str, now: Instant) -> Option<&'a Slot> {
    keyspace.get(key).filter(|slot| !slot.is_expired(now))
}

fn live_mut<'a>(keyspace: &'a mut Keyspace, key: &str, now: Instant) -> Option<&'a mut Slot> {
    if keyspace.get(key).is_some_and(|slot| slot.is_expired(now)) {
        keyspace.remove(key);
    }
    keyspace.get_mut(key)
}

fn live_or_insert<'a>(
    keyspace: &'a mut Keyspace,
    key: &str,
    now: Instant,
    init: impl FnOnce() -> Value,
) -> &'a mut Slot {
    if keyspace.get(key).is_some_and(|slot| slot.is_expired(now)) {
        keyspace.remove(key);
    }
    keyspace.entry(key.to_owned()).or_insert_with(|| Slot { value: init(), expires_at: None })
}

/// Removes `key` if it holds an empty collection.
fn prune(keyspace: &mut Keyspace, key: &str) {
    if keyspace.get(key).is_some_and(|slot| slot.value.is_empty_collection()) {
        keyspace.remove(key);
    }
}

macro_rules! typed_access {
    ($variant:ident, $ty:ty, $get:ident, $entry:ident) => {
        fn $get<'a>(keyspace: &'a Keyspace, key: &str, now: Instant) -> StorageResult<Option<&'a $ty>> {
            match live(keyspace, key, now).map(|slot| &slot.value) {
                None => Ok(None),
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(_) => Err(StorageError::wrong_type(key)),
            }
        }

        fn $entry<'a>(keyspace: &'a mut Keyspace, key: &str, now: Instant) -> StorageResult<&'a mut $ty> {
            match &mut live_or_insert(keyspace, key, now, || Value::$variant(Default::default())).value {
                Value::$variant(inner) => Ok(inner),
                _ => Err(StorageError::wrong_type(key)),
            }
        }
    };
    ($variant:ident, $ty:ty, $get:ident, $get_mut:ident, $entry:ident) => {
        typed_access!($variant, $ty, $get, $entry);

        fn $get_mut<'a>(
            keyspace: &'a mut Keyspace,
            key: &str,
            now: Instant,
        ) -> StorageResult<Option<&'a mut $ty>> {
            match live_mut(keyspace, key, now).map(|slot| &mut slot.value) {
                None => Ok(None),
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(_) => Err(StorageError::wrong_type(key)),
            }
        }
    };
}

typed_access!(Str, String, string, string_entry);
typed_access!(Hash, HashMap<String, String>, hash, hash_mut, hash_entry);
typed_access!(Set, HashSet<String>, set, set_mut, set_entry);
typed_access!(List, VecDeque<String>, list, list_mut, list_entry);

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn deadline(ttl: Ttl, now: Instant) -> Option<Instant> {
    ttl.as_duration().map(|d| now + d)
}

/// Resolves a possibly negative index against a list of `len` elements.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { len + index } else { index };
    if (0..len).contains(&index) { usize::try_from(index).ok() } else { None }
}

/// Resolves an inclusive range with negative indexes, clamped to the list.
/// `None` when the range selects nothing.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        available()?;
        let guard = self.data.read();
        Ok(string(&guard, key, Instant::now())?.cloned())
    }

    async fn set(&self, key: &str, value: String, ttl: Ttl) -> StorageResult<()> {
        available()?;
        let now = Instant::now();
        self.data
            .write()
            .insert(key.to_owned(), Slot { value: Value::Str(value), expires_at: deadline(ttl, now) });
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Ttl) -> StorageResult<bool> {
        available()?;
        let now = Instant::now();
        let mut guard = self.data.write();
        if live_mut(&mut guard, key, now).is_some() {
            return Ok(false);
        }
        guard.insert(key.to_owned(), Slot { value: Value::Str(value), expires_at: deadline(ttl, now) });
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<u64> {
        available()?;
        let now = Instant::now();
        let mut guard = self.data.write();
        let removed = keys
            .iter()
            .filter(|key| guard.remove(key.as_str()).is_some_and(|slot| !slot.is_expired(now)))
            .count();
        Ok(count(removed))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        available()?;
        Ok(live(&self.data.read(), key, Instant::now()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        available()?;
        let now = Instant::now();
        let mut guard = self.data.write();
        let Some(slot) = live_mut(&mut guard, key, now) else {
            return Ok(false);
        };
        slot.expires_at = Some(now + ttl);
        Ok(true)
    }

    async fn persist(&self, key: &str) -> StorageResult<bool> {
        available()?;
        let now = Instant::now();
        let mut guard = self.data.write();
        Ok(live_mut(&mut guard, key, now).is_some_and(|slot| slot.expires_at.take().is_some()))
    }

    async fn ttl(&self, key: &str) -> StorageResult<KeyTtl> {
        available()?;
        let now = Instant::now();
        let guard = self.data.read();
        Ok(match live(&guard, key, now) {
            None => KeyTtl::Missing,
            Some(Slot { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(Slot { expires_at: Some(at), .. }) => {
                KeyTtl::Expires(at.saturating_duration_since(now))
            },
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StorageResult<i64> {
        available()?;
        let mut guard = self.data.write();
        let current = string_entry(&mut guard, key, Instant::now())?;
        let value = if current.is_empty() {
            0
        } else {
            current
                .parse::<i64>()
                .map_err(|_| StorageError::validation(format!("value at {key} is not an integer")))?
        };
        let next = value
            .checked_add(delta)
            .ok_or_else(|| StorageError::validation(format!("increment of {key} overflows")))?;
        *current = next.to_string();
        Ok(next)
    }

    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        available()?;
        let guard = self.data.read();
        Ok(hash(&guard, key, Instant::now())?.and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> StorageResult<HashMap<String, String>> {
        available()?;
        let guard = self.data.read();
        Ok(hash(&guard, key, Instant::now())?.cloned().unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> StorageResult<()> {
        available()?;
        let mut guard = self.data.write();
        hash_entry(&mut guard, key, Instant::now())?.insert(field.to_owned(), value);
        Ok(())
    }

    async fn hset_all(&self, key: &str, entries: HashMap<String, String>) -> StorageResult<()> {
        available()?;
        let mut guard = self.data.write();
        hash_entry(&mut guard, key, Instant::now())?.extend(entries);
        prune(&mut guard, key);
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StorageResult<u64> {
        available()?;
        let mut guard = self.data.write();
        let removed = match hash_mut(&mut guard, key, Instant::now())? {
            Some(h) => fields.iter().filter(|field| h.remove(field.as_str()).is_some()).count(),
            None => 0,
        };
        prune(&mut guard, key);
        Ok(count(removed))
    }

    async fn hexists(&self, key: &str, field: &str) -> StorageResult<bool> {
        available()?;
        let guard = self.data.read();
        Ok(hash(&guard, key, Instant::now())?.is_some_and(|h| h.contains_key(field)))
    }

    async fn hincr_by_float(&self, key: &str, field: &str, delta: f64) -> StorageResult<f64> {
        available()?;
        let mut guard = self.data.write();
        let h = hash_entry(&mut guard, key, Instant::now())?;
        let value = match h.get(field) {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                StorageError::validation(format!("hash field {key}.{field} is not a number"))
            })?,
            None => 0.0,
        };
        let next = value + delta;
        if !next.is_finite() {
            prune(&mut guard, key);
            return Err(StorageError::validation(format!("increment of {key}.{field} is not finite")));
        }
        h.insert(field.to_owned(), next.to_string());
        Ok(next)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StorageResult<u64> {
        available()?;
        let mut guard = self.data.write();
        let s = set_entry(&mut guard, key, Instant::now())?;
        let added = members.iter().filter(|member| s.insert((*member).clone())).count();
        prune(&mut guard, key);
        Ok(count(added))
    }

    async fn smembers(&self, key: &str) -> StorageResult<HashSet<String>> {
        available()?;
        let guard = self.data.read();
        Ok(set(&guard, key, Instant::now())?.cloned().unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> StorageResult<bool> {
        available()?;
        let guard = self.data.read();
        Ok(set(&guard, key, Instant::now())?.is_some_and(|s| s.contains(member)))
    }

    async fn scard(&self, key: &str) -> StorageResult<u64> {
        available()?;
        let guard = self.data.read();
        Ok(set(&guard, key, Instant::now())?.map_or(0, |s| count(s.len())))
    }

    async fn srem(&self, key: &str, members: &[String]) -> StorageResult<u64> {
        available()?;
        let mut guard = self.data.write();
        let removed = match set_mut(&mut guard, key, Instant::now())? {
            Some(s) => members.iter().filter(|member| s.remove(member.as_str())).count(),
            None => 0,
        };
        prune(&mut guard, key);
        Ok(count(removed))
    }

    async fn lpush(&self, key: &str, values: &[String]) -> StorageResult<u64> {
        available()?;
        let mut guard = self.data.write();
        let l = list_entry(&mut guard, key, Instant::now())?;
        for value in values {
            l.push_front(value.clone());
        }
        let len = count(l.len());
        prune(&mut guard, key);
        Ok(len)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> StorageResult<u64> {
        available()?;
        let mut guard = self.data.write();
        let l = list_entry(&mut guard, key, Instant::now())?;
        l.extend(values.iter().cloned());
        let len = count(l.len());
        prune(&mut guard, key);
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>> {
        available()?;
        let guard = self.data.read();
        let Some(l) = list(&guard, key, Instant::now())? else {
            return Ok(Vec::new());
        };
        Ok(resolve_range(l.len(), start, stop)
            .map(|(from, to)| l.range(from..=to).cloned().collect())
            .unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> StorageResult<u64> {
        available()?;
        let guard = self.data.read();
        Ok(list(&guard, key, Instant::now())?.map_or(0, |l| count(l.len())))
    }

    async fn lindex(&self, key: &str, index: i64) -> StorageResult<Option<String>> {
        available()?;
        let guard = self.data.read();
        Ok(list(&guard, key, Instant::now())?
            .and_then(|l| resolve_index(l.len(), index).and_then(|i| l.get(i)).cloned()))
    }

    async fn lpop(&self, key: &str) -> StorageResult<Option<String>> {
        available()?;
        let mut guard = self.data.write();
        let popped = list_mut(&mut guard, key, Instant::now())?.and_then(VecDeque::pop_front);
        prune(&mut guard, key);
        Ok(popped)
    }

    async fn rpop(&self, key: &str) -> StorageResult<Option<String>> {
        available()?;
        let mut guard = self.data.write();
        let popped = list_mut(&mut guard, key, Instant::now())?.and_then(VecDeque::pop_back);
        prune(&mut guard, key);
        Ok(popped)
    }

    async fn lset(&self, key: &str, index: i64, value: String) -> StorageResult<()> {
        available()?;
        let mut guard = self.data.write();
        let l = list_mut(&mut guard, key, Instant::now())?
            .ok_or_else(|| StorageError::validation(format!("no list at {key}")))?;
        let slot = resolve_index(l.len(), index)
            .and_then(|i| l.get_mut(i))
            .ok_or_else(|| StorageError::validation(format!("index {index} out of range")))?;
        *slot = value;
        Ok(())
    }

    async fn lrem(&self, key: &str, count_hint: i64, value: &str) -> StorageResult<u64> {
        available()?;
        let mut guard = self.data.write();
        let Some(l) = list_mut(&mut guard, key, Instant::now())? else {
            return Ok(0);
        };
        let limit = if count_hint == 0 {
            usize::MAX
        } else {
            usize::try_from(count_hint.unsigned_abs()).unwrap_or(usize::MAX)
        };

        let mut removed = 0;
        let mut kept = VecDeque::with_capacity(l.len());
        if count_hint >= 0 {
            for item in l.drain(..) {
                if removed < limit && item == value {
                    removed += 1;
                } else {
                    kept.push_back(item);
                }
            }
        } else {
            while let Some(item) = l.pop_back() {
                if removed < limit && item == value {
                    removed += 1;
                } else {
                    kept.push_front(item);
                }
            }
        }
        *l = kept;
        prune(&mut guard, key);
        Ok(count(removed))
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> StorageResult<()> {
        available()?;
        let mut guard = self.data.write();
        if let Some(l) = list_mut(&mut guard, key, Instant::now())? {
            match resolve_range(l.len(), start, stop) {
                Some((from, to)) => {
                    l.truncate(to + 1);
                    l.drain(..from);
                },
                None => l.clear(),
            }
        }
        prune(&mut guard, key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[rstest]
    #[case(0, -1, Some((0, 4)))]
    #[case(1, 2, Some((1, 2)))]
    #[case(-2, -1, Some((3, 4)))]
    #[case(-100, 100, Some((0, 4)))]
    #[case(3, 1, None)]
    #[case(5, 10, None)]
    #[case(0, -6, None)]
    fn test_resolve_range(#[case] start: i64, #[case] stop: i64, #[case] expected: Option<(usize, usize)>) {
        assert_eq!(resolve_range(5, start, stop), expected);
    }

    #[rstest]
    #[case(0, Some(0))]
    #[case(-1, Some(4))]
    #[case(-5, Some(0))]
    #[case(-6, None)]
    #[case(5, None)]
    fn test_resolve_index(#[case] index: i64, #[case] expected: Option<usize>) {
        assert_eq!(resolve_index(5, index), expected);
    }

    #[tokio::test]
    async fn test_string_roundtrip_and_overwrite() {
        let cache = MemoryCache::new();
        cache.set("k", "v1".into(), Ttl::Persist).await.unwrap();
        cache.set("k", "v2".into(), Ttl::Persist).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Ttl::Persist).await.unwrap();
        let err = cache.hget("k", "f").await.unwrap_err();
        assert!(matches!(err, StorageError::WrongType { .. }));
        assert!(cache.rpush("k", &strings(&["a"])).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_persist() {
        let cache = MemoryCache::new();
        cache.set("short", "v".into(), Ttl::Seconds(5)).await.unwrap();
        cache.set("kept", "v".into(), Ttl::Seconds(5)).await.unwrap();
        assert!(cache.persist("kept").await.unwrap());
        assert!(!cache.persist("kept").await.unwrap());

        assert!(matches!(cache.ttl("short").await.unwrap(), KeyTtl::Expires(_)));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(!cache.exists("short").await.unwrap());
        assert_eq!(cache.ttl("short").await.unwrap(), KeyTtl::Missing);
        assert_eq!(cache.ttl("kept").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_releases_expired_keys() {
        let config = CacheConfig::builder().cleanup_interval(Duration::from_millis(100)).build().unwrap();
        let cache = MemoryCache::with_config(&config);
        cache.set("k", "v".into(), Ttl::Seconds(1)).await.unwrap();
        assert_eq!(cache.stored_keys(), 1);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(cache.stored_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeper() {
        let config = CacheConfig::builder().cleanup_interval(Duration::from_millis(100)).build().unwrap();
        let cache = MemoryCache::with_config(&config);
        cache.shutdown();
        cache.set("k", "v".into(), Ttl::Seconds(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(cache.stored_keys(), 1);
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let cache = MemoryCache::new();
        assert!(cache.set_if_absent("lock", "a".into(), Ttl::Seconds(30)).await.unwrap());
        assert!(!cache.set_if_absent("lock", "b".into(), Ttl::Seconds(30)).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_incr_by() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr_by("n", 3).await.unwrap(), 3);
        assert_eq!(cache.incr_by("n", -5).await.unwrap(), -2);

        cache.set("s", "abc".into(), Ttl::Persist).await.unwrap();
        assert!(matches!(cache.incr_by("s", 1).await, Err(StorageError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let cache = MemoryCache::new();
        cache.hset("h", "a", "1".into()).await.unwrap();
        cache
            .hset_all("h", HashMap::from([("b".to_owned(), "2".to_owned())]))
            .await
            .unwrap();
        assert_eq!(cache.hgetall("h").await.unwrap().len(), 2);
        assert_eq!(cache.hincr_by_float("h", "a", 0.5).await.unwrap(), 1.5);
        assert_eq!(cache.hget("h", "a").await.unwrap().as_deref(), Some("1.5"));

        assert_eq!(cache.hdel("h", &strings(&["a", "b", "c"])).await.unwrap(), 2);
        assert!(!cache.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_operations() {
        let cache = MemoryCache::new();
        assert_eq!(cache.sadd("s", &strings(&["a", "b", "a"])).await.unwrap(), 2);
        assert_eq!(cache.scard("s").await.unwrap(), 2);
        assert!(cache.sismember("s", "a").await.unwrap());
        assert_eq!(cache.srem("s", &strings(&["a", "z"])).await.unwrap(), 1);
        assert_eq!(cache.smembers("s").await.unwrap(), HashSet::from(["b".to_owned()]));
    }

    #[tokio::test]
    async fn test_list_push_order() {
        let cache = MemoryCache::new();
        cache.rpush("l", &strings(&["b", "c"])).await.unwrap();
        assert_eq!(cache.lpush("l", &strings(&["a0", "a1"])).await.unwrap(), 4);
        assert_eq!(cache.lrange("l", 0, -1).await.unwrap(), strings(&["a1", "a0", "b", "c"]));
        assert_eq!(cache.lindex("l", -1).await.unwrap().as_deref(), Some("c"));
        assert_eq!(cache.lpop("l").await.unwrap().as_deref(), Some("a1"));
        assert_eq!(cache.rpop("l").await.unwrap().as_deref(), Some("c"));
        assert_eq!(cache.llen("l").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lset_bounds() {
        let cache = MemoryCache::new();
        assert!(cache.lset("l", 0, "x".into()).await.is_err());
        cache.rpush("l", &strings(&["a", "b"])).await.unwrap();
        cache.lset("l", -1, "z".into()).await.unwrap();
        assert_eq!(cache.lrange("l", 0, -1).await.unwrap(), strings(&["a", "z"]));
        assert!(matches!(cache.lset("l", 2, "x".into()).await, Err(StorageError::Validation { .. })));
    }

    #[rstest]
    #[case(2, &["b", "x", "x", "x"])]
    #[case(-2, &["x", "x", "b", "x"])]
    #[case(0, &["b"])]
    #[tokio::test]
    async fn test_lrem_direction(#[case] count_hint: i64, #[case] expected: &[&str]) {
        let cache = MemoryCache::new();
        cache.rpush("l", &strings(&["x", "x", "b", "x", "x"])).await.unwrap();
        cache.lrem("l", count_hint, "x").await.unwrap();
        assert_eq!(cache.lrange("l", 0, -1).await.unwrap(), strings(expected));
    }

    #[tokio::test]
    async fn test_ltrim() {
        let cache = MemoryCache::new();
        cache.rpush("l", &strings(&["a", "b", "c", "d"])).await.unwrap();
        cache.ltrim("l", 1, -2).await.unwrap();
        assert_eq!(cache.lrange("l", 0, -1).await.unwrap(), strings(&["b", "c"]));

        cache.ltrim("l", 5, 10).await.unwrap();
        assert!(!cache.exists("l").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_counts_existing() {
        let cache = MemoryCache::new();
        cache.set("a", "1".into(), Ttl::Persist).await.unwrap();
        cache.sadd("b", &strings(&["m"])).await.unwrap();
        assert_eq!(cache.delete(&strings(&["a", "b", "c"])).await.unwrap(), 2);
    }
}

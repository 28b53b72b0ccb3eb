//! Key-value cache abstraction.
//!
//! [`CacheBackend`] is the strict seam to a remote key-value cache: string,
//! hash, set and list values with per-key expiry, where every call returns a
//! [`StorageResult`]. [`CacheClient`] wraps a backend with the tolerant
//! contract business code uses: failures are logged and downgraded to
//! `false`, `0`, `None` or an empty collection.
//!
//! TTLs are whole seconds. On the wire `-1` means "no expiry".
//!
//! List indexes follow the usual cache convention: `0` is the head, negative
//! indexes count back from the tail (`-1` is the last element) and ranges are
//! inclusive on both ends.

mod client;
mod memory;

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
pub use client::CacheClient;
pub use memory::MemoryCache;

use crate::{StorageError, StorageResult};

/// Expiry requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// The key never expires.
    Persist,
    /// The key expires after this many seconds.
    Seconds(u64),
}

impl Ttl {
    /// Decodes a wire TTL: `-1` persists, positive values are seconds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for zero or any other negative value.
    pub fn from_wire(seconds: i64) -> StorageResult<Self> {
        match seconds {
            -1 => Ok(Self::Persist),
            s if s > 0 => Ok(Self::Seconds(s.unsigned_abs())),
            other => Err(StorageError::validation(format!("invalid ttl {other}"))),
        }
    }

    /// Encodes the TTL for the wire.
    #[must_use]
    pub fn to_wire(self) -> i64 {
        match self {
            Self::Persist => -1,
            Self::Seconds(s) => i64::try_from(s).unwrap_or(i64::MAX),
        }
    }

    /// Expiry as a duration, `None` when persistent.
    #[must_use]
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Persist => None,
            Self::Seconds(s) => Some(Duration::from_secs(s)),
        }
    }
}

impl From<Duration> for Ttl {
    /// Rounds up to whole seconds, with a one second minimum.
    fn from(duration: Duration) -> Self {
        let whole = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        Self::Seconds(whole.max(1))
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after this duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Encodes as seconds using the cache convention: `-2` missing, `-1`
    /// persistent, otherwise remaining seconds rounded up.
    #[must_use]
    pub fn to_wire(self) -> i64 {
        match self {
            Self::Missing => -2,
            Self::Persistent => -1,
            Self::Expires(remaining) => {
                let whole = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                i64::try_from(whole).unwrap_or(i64::MAX)
            },
        }
    }
}

/// Strict interface to a key-value cache.
///
/// Every method fails with [`StorageError::Unavailable`] or
/// [`StorageError::Timeout`] when the cache cannot be reached, and with
/// [`StorageError::WrongType`] when a key holds a different kind of value.
/// A key whose TTL has elapsed behaves as absent.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    // Strings and keys

    /// Returns the string stored at `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores a string, replacing any value and expiry.
    async fn set(&self, key: &str, value: String, ttl: Ttl) -> StorageResult<()>;

    /// Stores a string only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Ttl) -> StorageResult<bool>;

    /// Removes keys of any kind. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> StorageResult<u64>;

    /// Returns whether `key` exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Sets a key's expiry. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool>;

    /// Clears a key's expiry. Returns `false` if the key does not exist or had
    /// no expiry.
    async fn persist(&self, key: &str) -> StorageResult<bool>;

    /// Remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> StorageResult<KeyTtl>;

    /// Adds `delta` to the integer at `key` (absent counts as `0`).
    ///
    /// Fails with [`StorageError::Validation`] if the value is not an integer
    /// or the result overflows.
    async fn incr_by(&self, key: &str, delta: i64) -> StorageResult<i64>;

    // Hashes

    /// Returns one hash field.
    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<String>>;

    /// Returns every field of a hash.
    async fn hgetall(&self, key: &str) -> StorageResult<HashMap<String, String>>;

    /// Sets one hash field.
    async fn hset(&self, key: &str, field: &str, value: String) -> StorageResult<()>;

    /// Sets several hash fields.
    async fn hset_all(&self, key: &str, entries: HashMap<String, String>) -> StorageResult<()>;

    /// Removes hash fields. Returns how many existed.
    async fn hdel(&self, key: &str, fields: &[String]) -> StorageResult<u64>;

    /// Returns whether a hash field exists.
    async fn hexists(&self, key: &str, field: &str) -> StorageResult<bool>;

    /// Adds `delta` to a numeric hash field (absent counts as `0`).
    async fn hincr_by_float(&self, key: &str, field: &str, delta: f64) -> StorageResult<f64>;

    // Sets

    /// Adds members. Returns how many were new.
    async fn sadd(&self, key: &str, members: &[String]) -> StorageResult<u64>;

    /// Returns every member.
    async fn smembers(&self, key: &str) -> StorageResult<HashSet<String>>;

    /// Returns whether `member` is in the set.
    async fn sismember(&self, key: &str, member: &str) -> StorageResult<bool>;

    /// Number of members.
    async fn scard(&self, key: &str) -> StorageResult<u64>;

    /// Removes members. Returns how many existed.
    async fn srem(&self, key: &str, members: &[String]) -> StorageResult<u64>;

    // Lists

    /// Prepends values one by one. Returns the new length.
    async fn lpush(&self, key: &str, values: &[String]) -> StorageResult<u64>;

    /// Appends values. Returns the new length.
    async fn rpush(&self, key: &str, values: &[String]) -> StorageResult<u64>;

    /// Returns the inclusive range `start..=stop`.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>>;

    /// List length.
    async fn llen(&self, key: &str) -> StorageResult<u64>;

    /// Returns the element at `index`.
    async fn lindex(&self, key: &str, index: i64) -> StorageResult<Option<String>>;

    /// Removes and returns the head.
    async fn lpop(&self, key: &str) -> StorageResult<Option<String>>;

    /// Removes and returns the tail.
    async fn rpop(&self, key: &str) -> StorageResult<Option<String>>;

    /// Replaces the element at `index`.
    ///
    /// Fails with [`StorageError::Validation`] if the key is missing or the
    /// index is out of range.
    async fn lset(&self, key: &str, index: i64, value: String) -> StorageResult<()>;

    /// Removes occurrences of `value`: the first `count` from the head when
    /// positive, the last `-count` from the tail when negative, all when zero.
    /// Returns how many were removed.
    async fn lrem(&self, key: &str, count: i64, value: &str) -> StorageResult<u64>;

    /// Keeps only the inclusive range `start..=stop`.
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> StorageResult<()>;
}

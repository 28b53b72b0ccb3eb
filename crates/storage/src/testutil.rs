//! Shared test utilities for repository and cache testing.
//!
//! This module provides a sample entity, ready-made repositories and caches,
//! and assertions on [`StorageResult`] values. It is feature-gated behind
//! `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! microbase-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use microbase_storage::testutil::{SampleDoc, sample_repository, seeded_repository};
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    audit::{AuditEvent, AuditLogger},
    cache::{CacheClient, MemoryCache},
    document::MemoryDocumentStore,
    entity::{BaseDocument, Entity, FieldValue},
    error::{StorageError, StorageResult},
    path::Field,
    repository::Repository,
};

/// Nested object stored on [`SampleDoc::profile`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl Profile {
    pub const CITY: Field<Profile> = Field::new("city");
    pub const COUNTRY: Field<Profile> = Field::new("country");
}

/// One element of [`SampleDoc::lines`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub sku: String,
    pub qty: i64,
}

impl Line {
    pub const SKU: Field<Line> = Field::new("sku");
    pub const QTY: Field<Line> = Field::new("qty");
}

/// Entity used across tests, stored in the `samples` collection.
///
/// Every own field is optional so skip-null updates can be exercised field by
/// field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleDoc {
    #[serde(flatten)]
    pub base: BaseDocument,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub lines: Option<Vec<Line>>,
}

impl SampleDoc {
    pub const NAME: Field<SampleDoc> = Field::new("name");
    pub const TAGS: Field<SampleDoc> = Field::new("tags");
    pub const SCORE: Field<SampleDoc> = Field::new("score");
    pub const PROFILE: Field<SampleDoc> = Field::new("profile");
    pub const LINES: Field<SampleDoc> = Field::new("lines");

    /// A document with only `name` set.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self { name: Some(name.to_owned()), ..Self::default() }
    }

    /// A document carrying an existing id and nothing else, as used for
    /// partial updates.
    #[must_use]
    pub fn with_id(id: &str) -> Self {
        let mut doc = Self::default();
        doc.base.id = id.to_owned();
        doc
    }

    /// Sets `score`.
    #[must_use]
    pub fn scored(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    /// Sets `tags`.
    #[must_use]
    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags = Some(tags.iter().map(|t| (*t).to_owned()).collect());
        self
    }
}

impl Entity for SampleDoc {
    const COLLECTION: &'static str = "samples";

    fn base(&self) -> &BaseDocument {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseDocument {
        &mut self.base
    }

    fn field_values(&self) -> StorageResult<Vec<FieldValue>> {
        Ok(vec![
            Self::NAME.value_of(&self.name)?,
            Self::TAGS.value_of(&self.tags)?,
            Self::SCORE.value_of(&self.score)?,
            Self::PROFILE.value_of(&self.profile)?,
            Self::LINES.value_of(&self.lines)?,
        ])
    }
}

/// A repository of [`SampleDoc`] over a fresh in-memory store.
///
/// The store is returned too, for assertions on raw stored documents.
#[must_use]
pub fn sample_repository() -> (Repository<SampleDoc>, Arc<MemoryDocumentStore>) {
    let store = Arc::new(MemoryDocumentStore::new());
    let repo = Repository::builder().store(store.clone()).build();
    (repo, store)
}

/// A [`sample_repository`] pre-populated with `count` documents named
/// `"{prefix}-{idx:03}"` whose score is the index.
///
/// # Panics
///
/// Panics if any insert fails (should not happen with `MemoryDocumentStore`).
#[allow(clippy::expect_used)]
pub async fn seeded_repository(
    prefix: &str,
    count: usize,
) -> (Repository<SampleDoc>, Arc<MemoryDocumentStore>) {
    let (repo, store) = sample_repository();
    let docs = (0..count).map(|idx| {
        let score = i64::try_from(idx).unwrap_or(i64::MAX);
        Some(SampleDoc::named(&format!("{prefix}-{idx:03}")).scored(score))
    });
    repo.create_many(docs).await.expect("seed insert failed");
    (repo, store)
}

/// A [`CacheClient`] over a fresh [`MemoryCache`], with the backend returned
/// for direct inspection.
///
/// Must be called inside a Tokio runtime.
#[must_use]
pub fn memory_cache_client() -> (CacheClient, MemoryCache) {
    let backend = MemoryCache::new();
    (CacheClient::new(Arc::new(backend.clone())), backend)
}

/// Audit logger that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CapturingAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl CapturingAuditLogger {
    /// Snapshot of the events logged so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditLogger for CapturingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Assert that a [`StorageResult`] is a [`StorageError::Validation`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use microbase_storage::{assert_validation, StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::validation("bad input"));
/// assert_validation!(result);
/// ```
#[macro_export]
macro_rules! assert_validation {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Validation { .. })),
            "expected StorageError::Validation, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Validation { .. })),
            "{}: expected StorageError::Validation, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::Unavailable`].
#[macro_export]
macro_rules! assert_unavailable {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Unavailable { .. })),
            "expected StorageError::Unavailable, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`.
///
/// Returns the inner value on success, panics with a descriptive message
/// on failure.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use microbase_storage::{assert_storage_ok, StorageResult};
///
/// let result: StorageResult<i32> = Ok(42);
/// let value = assert_storage_ok!(result);
/// assert_eq!(value, 42);
/// ```
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Returns `true` if the result is a path resolution error.
pub fn is_path_error<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::PathResolution { .. }))
}

/// Returns `true` if the result is a transient error.
pub fn is_transient<T>(result: &StorageResult<T>) -> bool {
    result.as_ref().err().is_some_and(StorageError::is_transient)
}

//! Shared document repository and cache access for microbase services.
//!
//! This crate provides the generic [`Repository`] every service uses for its
//! entities, the [`Criteria`] and [`Update`] builders it is composed from, and
//! a tolerant [`CacheClient`] over a key-value cache.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! │        (entity services, session authority, handlers)       │
//! ├──────────────────────────────────┬──────────────────────────┤
//! │        Repository<T: Entity>     │       CacheClient        │
//! │  CRUD, skip-null updates, upsert │  tolerant: false / None  │
//! │  batch writes, roll page         │  on cache failure        │
//! ├──────────────────────────────────┤                          │
//! │  Criteria │ Update │ FieldPath   │                          │
//! ├──────────────────────────────────┼──────────────────────────┤
//! │        DocumentStore trait       │    CacheBackend trait    │
//! ├──────────────────────────────────┼──────────────────────────┤
//! │       MemoryDocumentStore        │       MemoryCache        │
//! └──────────────────────────────────┴──────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use microbase_storage::{
//!     Criteria, MemoryDocumentStore, Repository, Update, testutil::SampleDoc,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = Repository::<SampleDoc>::builder()
//!         .store(Arc::new(MemoryDocumentStore::new()))
//!         .build();
//!
//!     // Ids and timestamps are assigned on create
//!     let created = repo.create(SampleDoc::named("foo").scored(3)).await?;
//!
//!     // Only the fields set on the patch are written
//!     let mut patch = SampleDoc::with_id(&created.base.id);
//!     patch.score = Some(4);
//!     repo.update_skip_null_by_id(&patch).await?;
//!
//!     let found = repo
//!         .find(Criteria::new().field(SampleDoc::SCORE).gte(4), &[])
//!         .await?;
//!     assert_eq!(found[0].name.as_deref(), Some("foo"));
//!
//!     // Explicit update documents
//!     repo.update_by_id(&created.base.id, Update::base().set(SampleDoc::NAME, "bar")?)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Stores and caches
//!
//! | Implementation | Trait | Use Case |
//! |----------------|-------|----------|
//! | [`MemoryDocumentStore`] | [`DocumentStore`] | Testing, development |
//! | [`MemoryCache`] | [`CacheBackend`] | Testing, single process |
//!
//! A remote document store or cache is integrated by implementing the trait
//! and mapping its failures to [`StorageError::Unavailable`] or
//! [`StorageError::Timeout`]. See the [`document`] and [`cache`] module
//! sources for reference implementations.
//!
//! # Error Handling
//!
//! Repository operations return [`StorageResult<T>`] and propagate store
//! failures; nothing is retried. The cache client is the exception: it
//! downgrades failures to `false`, `0`, `None` or empty results after logging
//! them.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (sample entity,
//!   repository and cache factories, assertion macros). Enable this in `[dev-dependencies]` for
//!   integration tests.
//! - **`failpoints`**: Activates the `fail` injection points in the in-memory store and cache.

#![deny(unsafe_code)]

pub mod audit;
pub mod cache;
pub mod config;
pub mod criteria;
pub mod document;
pub mod entity;
pub mod error;
pub mod id;
pub mod page;
pub mod path;
pub mod repository;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod update;

// Re-export primary types at crate root for convenience
pub use audit::{
    ACTOR_EMAIL_KEY, ACTOR_NAME_KEY, AuditAction, AuditEvent, AuditLogDoc, AuditLogger, AuditResult,
    DocumentAuditLogger, NoopAuditLogger, TracingAuditLogger,
};
pub use cache::{CacheBackend, CacheClient, KeyTtl, MemoryCache, Ttl};
pub use config::{CacheConfig, RepositoryConfig, ServiceInfo};
pub use criteria::{Criteria, Criterion, Pattern, SearchMode, escape_regex};
pub use document::{DocumentStore, FindOptions, MemoryDocumentStore, Sort, SortDirection};
pub use entity::{BaseDocument, Entity, FieldValue};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use id::IdGenerator;
pub use page::{RollPageParam, RollPageResult, TOTAL_NOT_COMPUTED};
pub use path::{Field, FieldPath, ResolvePath};
pub use repository::Repository;
pub use update::Update;

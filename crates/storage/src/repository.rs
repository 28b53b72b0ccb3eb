//! Document Repository: generic CRUD and roll-page access for one entity type.
//!
//! [`Repository<T>`] composes the [`Criteria`] and [`Update`] builders over a
//! [`DocumentStore`]. It holds no per-call state; concurrency correctness is
//! delegated to the store's per-document atomicity and bulk operations make no
//! cross-document atomicity claim.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use microbase_storage::{
//!     document::MemoryDocumentStore,
//!     page::RollPageParam,
//!     repository::Repository,
//!     testutil::SampleDoc,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let repo = Repository::<SampleDoc>::builder().store(Arc::new(MemoryDocumentStore::new())).build();
//!
//! let created = repo.create(SampleDoc::named("foo")).await?;
//! let page = repo
//!     .roll_page(
//!         &RollPageParam::builder()
//!             .keyword_type("name")
//!             .keyword_list(vec!["foo".to_owned()])
//!             .search_type("exact")
//!             .build(),
//!         None,
//!     )
//!     .await?;
//!
//! assert_eq!(page.total, -1);
//! assert_eq!(page.list[0].base.id, created.base.id);
//! # Ok::<(), microbase_storage::StorageError>(())
//! # }).unwrap();
//! ```

use std::{collections::BTreeSet, fmt, marker::PhantomData, sync::Arc};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    StorageError, StorageResult,
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult},
    config::RepositoryConfig,
    criteria::{Criteria, Criterion},
    document::{BulkOp, DocumentStore, FindOptions, Sort},
    entity::{Entity, UPDATED_AT, now},
    id::IdGenerator,
    page::{RollPageParam, RollPageResult, TOTAL_NOT_COMPUTED, Window},
    path::{ResolvePath, STORE_ID_KEY},
    update::Update,
};

/// Generic repository over entities of type `T`.
///
/// Cheaply cloneable; clones share the store, id generator and audit logger.
pub struct Repository<T: Entity> {
    store: Arc<dyn DocumentStore>,
    ids: Arc<IdGenerator>,
    config: RepositoryConfig,
    audit: Option<Arc<dyn AuditLogger>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ids: Arc::clone(&self.ids),
            config: self.config.clone(),
            audit: self.audit.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &T::COLLECTION)
            .field("config", &self.config)
            .field("audited", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl<T: Entity> Repository<T> {
    /// Creates a repository.
    ///
    /// Without `ids` the repository mints through [`IdGenerator::shared`].
    /// Pass a generator built with [`IdGenerator::from_service`] when several
    /// instances write to one store.
    #[builder]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        #[builder(default = IdGenerator::shared())] ids: Arc<IdGenerator>,
        #[builder(default)] config: RepositoryConfig,
        audit: Option<Arc<dyn AuditLogger>>,
    ) -> Self {
        Self { store, ids, config, audit, _entity: PhantomData }
    }
}

impl<T: Entity> Repository<T> {
    /// Paging and sorting configuration.
    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Inserts a new entity, assigning its id and timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] if the entity already carries an id
    /// (use [`create_with_id`](Self::create_with_id) to keep a caller id), or
    /// the store's error if the insert fails.
    #[tracing::instrument(skip(self, doc), fields(collection = T::COLLECTION))]
    pub async fn create(&self, doc: T) -> StorageResult<T> {
        if !doc.base().has_blank_id() {
            return Err(StorageError::validation(
                "create assigns ids; use create_with_id to keep a caller-supplied id",
            ));
        }
        self.create_with_id(doc).await
    }

    /// Inserts an entity, keeping its id when set and generating one otherwise.
    ///
    /// # Errors
    ///
    /// Returns the store's error; a duplicate id is a
    /// [`StorageError::Validation`].
    #[tracing::instrument(skip(self, doc), fields(collection = T::COLLECTION))]
    pub async fn create_with_id(&self, mut doc: T) -> StorageResult<T> {
        let started = now();
        doc.base_mut().create_build(&self.ids);
        let resource = self.resource(doc.id());

        let result = match serde_json::to_value(&doc) {
            Ok(value) => self.store.insert_many(T::COLLECTION, vec![value]).await,
            Err(e) => Err(e.into()),
        };
        self.record_audit(AuditAction::Create, resource, started, &result, []).await;
        result?;

        tracing::debug!(id = doc.id(), "document created");
        Ok(doc)
    }

    /// Inserts several new entities in one call, skipping `None` entries.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] if any entity already carries an id,
    /// or the store's error if the insert fails.
    #[tracing::instrument(skip(self, docs), fields(collection = T::COLLECTION))]
    pub async fn create_many(
        &self,
        docs: impl IntoIterator<Item = Option<T>>,
    ) -> StorageResult<Vec<T>> {
        let mut created: Vec<T> = docs.into_iter().flatten().collect();
        if created.is_empty() {
            return Ok(created);
        }
        if created.iter().any(|doc| !doc.base().has_blank_id()) {
            return Err(StorageError::validation("create_many assigns ids; found a preset id"));
        }

        let started = now();
        let mut values = Vec::with_capacity(created.len());
        for doc in &mut created {
            doc.base_mut().create_build(&self.ids);
            values.push(serde_json::to_value(&*doc)?);
        }

        let result = self.store.insert_many(T::COLLECTION, values).await;
        let count = created.len().to_string();
        self.record_audit(AuditAction::CreateMany, T::COLLECTION.to_owned(), started, &result, [(
            "requested", count,
        )])
        .await;
        result?;

        tracing::debug!(count = created.len(), "documents created");
        Ok(created)
    }

    /// Looks up one entity by id. A blank id returns `None`.
    ///
    /// `fields` is a projection allow-list; empty returns the whole entity.
    #[tracing::instrument(skip(self, fields), fields(collection = T::COLLECTION))]
    pub async fn get_by_id(&self, id: &str, fields: &[&str]) -> StorageResult<Option<T>> {
        if id.trim().is_empty() {
            return Ok(None);
        }
        let options = FindOptions::builder()
            .filter(id_filter(id)?)
            .limit(1)
            .maybe_projection(projection(fields)?)
            .build();
        Ok(self.find_with(options).await?.into_iter().next())
    }

    /// Looks up several entities by id. Blank ids are ignored; no usable ids
    /// returns an empty list.
    #[tracing::instrument(skip(self, ids, fields), fields(collection = T::COLLECTION))]
    pub async fn list_by_ids<I, S>(&self, ids: I, fields: &[&str]) -> StorageResult<Vec<T>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = distinct_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let options = FindOptions::builder()
            .filter(Criteria::new().field(STORE_ID_KEY).is_in(&ids).build()?)
            .maybe_projection(projection(fields)?)
            .build();
        self.find_with(options).await
    }

    /// Returns every entity of the collection. No limit is applied.
    #[tracing::instrument(skip(self, fields), fields(collection = T::COLLECTION))]
    pub async fn list_all(&self, fields: &[&str]) -> StorageResult<Vec<T>> {
        let options = FindOptions::builder().maybe_projection(projection(fields)?).build();
        self.find_with(options).await
    }

    /// Returns the id of every entity of the collection.
    #[tracing::instrument(skip(self), fields(collection = T::COLLECTION))]
    pub async fn list_all_ids(&self) -> StorageResult<Vec<String>> {
        let options = FindOptions::builder().projection(vec![STORE_ID_KEY.to_owned()]).build();
        let docs = self.store.find(T::COLLECTION, options).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| doc.get(STORE_ID_KEY).and_then(Value::as_str).map(str::to_owned))
            .collect())
    }

    /// Returns entities matching `criteria`.
    #[tracing::instrument(skip(self, criteria, fields), fields(collection = T::COLLECTION))]
    pub async fn find(&self, criteria: Criteria, fields: &[&str]) -> StorageResult<Vec<T>> {
        let options = FindOptions::builder()
            .filter(criteria.build()?)
            .maybe_projection(projection(fields)?)
            .build();
        self.find_with(options).await
    }

    /// Counts entities matching `criteria`.
    #[tracing::instrument(skip(self, criteria), fields(collection = T::COLLECTION))]
    pub async fn count(&self, criteria: Criteria) -> StorageResult<u64> {
        self.store.count(T::COLLECTION, &criteria.build()?).await
    }

    /// Hard-deletes one entity. Returns `true` only if exactly one was removed.
    #[tracing::instrument(skip(self), fields(collection = T::COLLECTION))]
    pub async fn delete_by_id(&self, id: &str) -> StorageResult<bool> {
        if id.trim().is_empty() {
            return Ok(false);
        }
        let started = now();
        let result = match id_filter(id) {
            Ok(filter) => self.store.delete_many(T::COLLECTION, &filter).await,
            Err(e) => Err(e),
        };
        self.record_audit(AuditAction::Delete, self.resource(id), started, &result, []).await;
        Ok(result? == 1)
    }

    /// Hard-deletes several entities. Returns `true` only if the number
    /// removed equals the number of distinct non-blank ids requested; a
    /// partial delete reports `false` even though some entities are gone.
    #[tracing::instrument(skip(self, ids), fields(collection = T::COLLECTION))]
    pub async fn delete_by_ids<I, S>(&self, ids: I) -> StorageResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = distinct_ids(ids);
        if ids.is_empty() {
            return Ok(false);
        }
        let started = now();
        let result = match Criteria::new().field(STORE_ID_KEY).is_in(&ids).build() {
            Ok(filter) => self.store.delete_many(T::COLLECTION, &filter).await,
            Err(e) => Err(e),
        };
        let requested = ids.len().to_string();
        self.record_audit(AuditAction::BatchDelete, T::COLLECTION.to_owned(), started, &result, [(
            "requested", requested,
        )])
        .await;
        Ok(result? == ids.len() as u64)
    }

    /// Writes every populated field of `doc` to the stored entity with the
    /// same id, refreshing `updatedAt`. Returns `false` for a blank id or when
    /// nothing was modified.
    #[tracing::instrument(skip(self, doc), fields(collection = T::COLLECTION, id = doc.id()))]
    pub async fn update_skip_null_by_id(&self, doc: &T) -> StorageResult<bool> {
        if doc.base().has_blank_id() {
            return Ok(false);
        }
        let update = Update::base().skip_null_fields(doc)?;
        self.update_by_id(doc.id(), update).await
    }

    /// Applies `update` to the entity with the given id. `updatedAt` is added
    /// when the update does not set it. Returns `false` for a blank id or when
    /// nothing was modified.
    #[tracing::instrument(skip(self, update), fields(collection = T::COLLECTION))]
    pub async fn update_by_id(&self, id: &str, update: Update) -> StorageResult<bool> {
        if id.trim().is_empty() {
            return Ok(false);
        }
        let update = with_updated_at(update)?;
        let started = now();
        let result = match id_filter(id) {
            Ok(filter) => self.store.update_one(T::COLLECTION, &filter, &update, false).await,
            Err(e) => Err(e),
        };
        self.record_audit(AuditAction::Update, self.resource(id), started, &result, []).await;
        Ok(result?.modified > 0)
    }

    /// Skip-null updates several entities in one unordered bulk write.
    ///
    /// Entries with blank ids are skipped. Returns `true` iff at least one
    /// operation was sent and executed; per-entry outcomes are not reported.
    #[tracing::instrument(skip(self, docs), fields(collection = T::COLLECTION))]
    pub async fn batch_update_skip_null_by_id(&self, docs: &[T]) -> StorageResult<bool> {
        let mut ops = Vec::new();
        for doc in docs.iter().filter(|doc| !doc.base().has_blank_id()) {
            ops.push(BulkOp::UpdateOne {
                filter: id_filter(doc.id())?,
                update: Update::base().skip_null_fields(doc)?,
                upsert: false,
            });
        }
        if ops.is_empty() {
            return Ok(false);
        }

        let started = now();
        let queued = ops.len().to_string();
        let result = self.store.bulk_write(T::COLLECTION, ops).await;
        self.record_audit(AuditAction::BatchUpdate, T::COLLECTION.to_owned(), started, &result, [(
            "queued", queued,
        )])
        .await;
        Ok(result?.executed > 0)
    }

    /// Inserts `doc` if no entity has its id, otherwise writes its populated
    /// fields. Creation metadata is only written on insert. A blank id gets a
    /// fresh one, which always inserts.
    #[tracing::instrument(skip(self, doc), fields(collection = T::COLLECTION, id = doc.id()))]
    pub async fn create_or_update_skip_null_by_id(&self, doc: &T) -> StorageResult<()> {
        let (filter, update) = self.upsert_parts(doc)?;
        let resource = update_target(&update);
        let started = now();
        let result = self.store.upsert_one(T::COLLECTION, &filter, &update).await;
        self.record_audit(AuditAction::Upsert, self.resource(&resource), started, &result, []).await;
        result.map(|_| ())
    }

    /// Upserts several entities in one unordered bulk write.
    #[tracing::instrument(skip(self, docs), fields(collection = T::COLLECTION))]
    pub async fn batch_create_or_update_skip_null_by_id(&self, docs: &[T]) -> StorageResult<()> {
        let mut ops = Vec::with_capacity(docs.len());
        for doc in docs {
            let (filter, update) = self.upsert_parts(doc)?;
            ops.push(BulkOp::UpdateOne { filter, update, upsert: true });
        }
        if ops.is_empty() {
            return Ok(());
        }

        let started = now();
        let queued = ops.len().to_string();
        let result = self.store.bulk_write(T::COLLECTION, ops).await;
        self.record_audit(AuditAction::BatchUpsert, T::COLLECTION.to_owned(), started, &result, [(
            "queued", queued,
        )])
        .await;
        result.map(|_| ())
    }

    /// Builds the roll-page filter for `param` without running it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for an unknown search type.
    pub fn roll_page_criteria(&self, param: &RollPageParam) -> StorageResult<Criteria> {
        param.to_criteria()
    }

    /// Runs a roll page query.
    ///
    /// The parameter's filters are ANDed with `extra`. Stages run in a fixed
    /// order: filter, optional count, sort, skip/limit, projection. Without
    /// `need_count` the result's `total` is `-1`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for unknown search or sort tags,
    /// [`StorageError::PathResolution`] for unusable field names, or the
    /// store's error.
    #[tracing::instrument(skip(self, param, extra), fields(collection = T::COLLECTION))]
    pub async fn roll_page(
        &self,
        param: &RollPageParam,
        extra: Option<Criteria>,
    ) -> StorageResult<RollPageResult<T>> {
        let mut criteria = self.roll_page_criteria(param)?;
        if let Some(extra) = extra {
            criteria = criteria.and_operator([extra]);
        }
        let filter = criteria.build()?;

        let sort_key = param
            .sort_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .unwrap_or(self.config.default_sort_key());
        let direction = param.sort_direction()?.unwrap_or(self.config.default_sort_direction());
        let sort = Sort::new(sort_key, direction)?;

        let page_size = param
            .page_size
            .unwrap_or_else(|| i64::try_from(self.config.default_page_size()).unwrap_or(i64::MAX));
        let window = Window::of(param.page_num.unwrap_or(1), page_size, self.config.max_page_size())?;

        tracing::info!(
            filter = %filter,
            sort = %format!("{}:{}", sort.path(), sort.direction()),
            skip = window.skip,
            limit = ?window.limit,
            need_count = param.need_count,
            "roll page query"
        );

        let total = if param.need_count {
            i64::try_from(self.store.count(T::COLLECTION, &filter).await?).unwrap_or(i64::MAX)
        } else {
            TOTAL_NOT_COMPUTED
        };

        let options = FindOptions::builder()
            .filter(filter)
            .sort(vec![sort])
            .skip(window.skip)
            .maybe_limit(window.limit)
            .maybe_projection(projection(&param.projection())?)
            .build();
        let list = self.find_with(options).await?;

        Ok(RollPageResult { total, list })
    }

    async fn find_with(&self, options: FindOptions) -> StorageResult<Vec<T>> {
        self.store
            .find(T::COLLECTION, options)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StorageError::from))
            .collect()
    }

    fn upsert_parts(&self, doc: &T) -> StorageResult<(Criterion, Update)> {
        let id = if doc.base().has_blank_id() { self.ids.next_id_string() } else { doc.id().to_owned() };
        let update = Update::upsert_base(&id).skip_null_fields(doc)?;
        Ok((id_filter(&id)?, update))
    }

    fn resource(&self, id: &str) -> String {
        format!("{}/{id}", T::COLLECTION)
    }

    async fn record_audit<R, const N: usize>(
        &self,
        action: AuditAction,
        resource: String,
        started_at: DateTime<Utc>,
        result: &StorageResult<R>,
        metadata: [(&str, String); N],
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let event = AuditEvent::builder()
            .started_at(started_at)
            .action(action)
            .resource(resource)
            .result(AuditResult::from_result(result))
            .metadata(metadata.into_iter().map(|(k, v)| (k.to_owned(), v)).collect())
            .build();
        audit.log(&event).await;
    }
}

fn id_filter(id: &str) -> StorageResult<Criterion> {
    Criteria::new().field(STORE_ID_KEY).is(id).build()
}

fn distinct_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    ids.into_iter()
        .map(|id| id.as_ref().trim().to_owned())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

fn projection<S: AsRef<str>>(fields: &[S]) -> StorageResult<Option<Vec<String>>> {
    if fields.is_empty() {
        return Ok(None);
    }
    fields.iter().map(|field| field.as_ref().resolve_path()).collect::<StorageResult<_>>().map(Some)
}

fn with_updated_at(update: Update) -> StorageResult<Update> {
    if update.always().contains_key(UPDATED_AT) {
        Ok(update)
    } else {
        update.set(UPDATED_AT, now().timestamp_millis())
    }
}

fn update_target(update: &Update) -> String {
    update.on_insert().get(STORE_ID_KEY).and_then(Value::as_str).unwrap_or_default().to_owned()
}

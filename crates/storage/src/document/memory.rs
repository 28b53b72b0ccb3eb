//! In-memory document store.
//!
//! [`MemoryDocumentStore`] keeps each collection in a [`BTreeMap`] keyed by
//! `_id` behind a [`parking_lot::RwLock`]. Filters are evaluated with
//! [`Criterion::matches`], so it behaves like a document database for the
//! operator set the [`Criteria`](crate::criteria::Criteria) builder emits.
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Every query is a full collection scan
//! - Upserts only seed the new document from top-level equality leaves

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;
use serde_json::Value;

use super::{BulkOp, BulkOutcome, DocumentStore, FindOptions, UpdateOutcome, compare_documents, project};
use crate::{
    StorageError, StorageResult,
    criteria::Criterion,
    path::STORE_ID_KEY,
    update::{Update, write_path},
};

type Collection = BTreeMap<String, Value>;

/// In-memory [`DocumentStore`].
///
/// Cheaply cloneable; all clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    /// Returns `true` if `collection` holds no documents.
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Raw stored document, bypassing projection. Intended for tests.
    #[must_use]
    pub fn raw(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections.read().get(collection).and_then(|docs| docs.get(id)).cloned()
    }
}

fn document_id(doc: &Value) -> StorageResult<String> {
    if !doc.is_object() {
        return Err(StorageError::validation("document must be a JSON object"));
    }
    match doc.get(STORE_ID_KEY) {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        _ => Err(StorageError::validation("document has no string _id")),
    }
}

/// Top-level equality leaves of a filter, used to seed an upserted document.
fn equality_seeds(filter: &Criterion) -> Vec<(&str, &Value)> {
    match filter {
        Criterion::Eq { path, value } => vec![(path.as_str(), value)],
        Criterion::And(children) => children.iter().flat_map(equality_seeds).collect(),
        _ => Vec::new(),
    }
}

fn update_in(
    docs: &mut Collection,
    filter: &Criterion,
    update: &Update,
    upsert: bool,
) -> StorageResult<UpdateOutcome> {
    let target = docs.iter().find(|(_, doc)| filter.matches(doc)).map(|(id, _)| id.clone());

    if let Some(id) = target {
        let Some(stored) = docs.get_mut(&id) else {
            return Ok(UpdateOutcome::default());
        };
        let mut next = stored.clone();
        update.apply(&mut next, false)?;
        if document_id(&next)? != id {
            return Err(StorageError::validation("update must not change _id"));
        }
        let modified = u64::from(next != *stored);
        *stored = next;
        return Ok(UpdateOutcome { matched: 1, modified, upserted_id: None });
    }

    if !upsert {
        return Ok(UpdateOutcome::default());
    }

    let mut fresh = Value::Object(serde_json::Map::new());
    for (path, value) in equality_seeds(filter) {
        write_path(&mut fresh, path, value.clone())?;
    }
    update.apply(&mut fresh, true)?;
    let id = document_id(&fresh)?;
    docs.insert(id.clone(), fresh);
    Ok(UpdateOutcome { matched: 0, modified: 0, upserted_id: Some(id) })
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> StorageResult<u64> {
        fail_point!("document-store-write", |_| {
            Err(StorageError::unavailable("injected document store outage"))
        });

        let mut ids = Vec::with_capacity(docs.len());
        for doc in &docs {
            ids.push(document_id(doc)?);
        }

        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_owned()).or_default();
        for (index, id) in ids.iter().enumerate() {
            if target.contains_key(id) || ids[..index].contains(id) {
                return Err(StorageError::validation(format!("duplicate _id '{id}'")));
            }
        }

        let inserted = docs.len() as u64;
        target.extend(ids.into_iter().zip(docs));
        Ok(inserted)
    }

    async fn find(&self, collection: &str, options: FindOptions) -> StorageResult<Vec<Value>> {
        fail_point!("document-store-read", |_| {
            Err(StorageError::unavailable("injected document store outage"))
        });

        let mut matched: Vec<Value> = {
            let collections = self.collections.read();
            collections
                .get(collection)
                .map(|docs| docs.values().filter(|doc| options.filter.matches(doc)).cloned().collect())
                .unwrap_or_default()
        };

        if !options.sort.is_empty() {
            matched.sort_by(|a, b| compare_documents(a, b, &options.sort));
        }

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options.limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let window = matched.into_iter().skip(skip).take(limit);

        Ok(match &options.projection {
            Some(fields) => window.map(|doc| project(&doc, fields)).collect(),
            None => window.collect(),
        })
    }

    async fn count(&self, collection: &str, filter: &Criterion) -> StorageResult<u64> {
        fail_point!("document-store-read", |_| {
            Err(StorageError::unavailable("injected document store outage"))
        });

        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map_or(0, |docs| docs.values().filter(|doc| filter.matches(doc)).count() as u64))
    }

    async fn delete_many(&self, collection: &str, filter: &Criterion) -> StorageResult<u64> {
        fail_point!("document-store-write", |_| {
            Err(StorageError::unavailable("injected document store outage"))
        });

        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, doc| !filter.matches(doc));
        Ok((before - docs.len()) as u64)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Criterion,
        update: &Update,
        upsert: bool,
    ) -> StorageResult<UpdateOutcome> {
        fail_point!("document-store-write", |_| {
            Err(StorageError::unavailable("injected document store outage"))
        });

        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_owned()).or_default();
        update_in(docs, filter, update, upsert)
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<BulkOp>) -> StorageResult<BulkOutcome> {
        fail_point!("document-store-write", |_| {
            Err(StorageError::unavailable("injected document store outage"))
        });

        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_owned()).or_default();
        let mut outcome = BulkOutcome::default();
        for op in ops {
            match op {
                BulkOp::UpdateOne { filter, update, upsert } => {
                    let single = update_in(docs, &filter, &update, upsert)?;
                    outcome.executed += 1;
                    outcome.matched += single.matched;
                    outcome.modified += single.modified;
                    outcome.upserted += u64::from(single.upserted_id.is_some());
                },
            }
        }
        Ok(outcome)
    }
}

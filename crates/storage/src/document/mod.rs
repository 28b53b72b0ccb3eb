//! Document store abstraction.
//!
//! [`DocumentStore`] is the seam between the [`Repository`](crate::repository::Repository)
//! and a schemaless document database. Documents are JSON objects keyed by
//! their `_id`; filters are [`Criterion`] trees and writes are [`Update`]s.
//!
//! # Implementing a Store
//!
//! 1. Implement [`DocumentStore`] for your client type.
//! 2. Translate filters with [`Criterion::to_filter_document`] and updates with
//!    [`Update::to_update_document`].
//! 3. Map connection failures to [`StorageError::Unavailable`](crate::StorageError::Unavailable)
//!    or [`StorageError::Timeout`](crate::StorageError::Timeout).
//!
//! See [`MemoryDocumentStore`] for the reference implementation.

mod memory;

use std::{cmp::Ordering, fmt, str::FromStr};

use async_trait::async_trait;
pub use memory::MemoryDocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    StorageError, StorageResult,
    criteria::{Criterion, compare},
    path::{PATH_SEPARATOR, ResolvePath, STORE_ID_KEY},
    update::Update,
};

/// Sort order of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first.
    Asc,
    /// Largest first.
    #[default]
    Desc,
}

impl SortDirection {
    /// Wire tag of the direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = StorageError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        if tag.eq_ignore_ascii_case("asc") {
            Ok(Self::Asc)
        } else if tag.eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            Err(StorageError::validation(format!("unknown sort order '{tag}'")))
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    path: String,
    direction: SortDirection,
}

impl Sort {
    /// Sorts by `path` in `direction`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathResolution`] if the path does not resolve.
    pub fn new(path: impl ResolvePath, direction: SortDirection) -> StorageResult<Self> {
        Ok(Self { path: path.resolve_path()?, direction })
    }

    /// Resolved sort path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sort direction.
    #[must_use]
    pub fn direction(&self) -> SortDirection {
        self.direction
    }
}

/// Query shape for [`DocumentStore::find`].
///
/// Stages run in a fixed order: filter, sort, skip/limit, projection.
#[derive(Debug, Clone, PartialEq, bon::Builder)]
pub struct FindOptions {
    /// Documents must match this filter.
    #[builder(default = Criterion::match_all())]
    pub filter: Criterion,
    /// Sort keys, most significant first.
    #[builder(default)]
    pub sort: Vec<Sort>,
    /// Number of matching documents to skip.
    #[builder(default)]
    pub skip: u64,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Allow-list of paths to return. `_id` is always returned.
    pub projection: Option<Vec<String>>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Result of a single-document update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents that matched the filter (0 or 1).
    pub matched: u64,
    /// Documents whose content actually changed (0 or 1).
    pub modified: u64,
    /// Id of the document created by an upsert.
    pub upserted_id: Option<String>,
}

/// One operation of an unordered bulk write.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum BulkOp {
    /// Update the first document matching `filter`, optionally inserting.
    UpdateOne {
        /// Selects the document.
        filter: Criterion,
        /// Assignments to apply.
        update: Update,
        /// Insert when nothing matches.
        upsert: bool,
    },
}

/// Aggregate result of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Operations that ran.
    pub executed: u64,
    /// Documents matched across all operations.
    pub matched: u64,
    /// Documents changed across all operations.
    pub modified: u64,
    /// Documents inserted by upserts.
    pub upserted: u64,
}

/// Abstract schemaless document store.
///
/// Implementations must be thread-safe and make each single-document write
/// atomic. No multi-document atomicity is required, including within
/// [`bulk_write`](DocumentStore::bulk_write).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts documents, each carrying its own `_id`. Returns the number inserted.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::Validation`] if a document is not an object,
    /// lacks a string `_id`, or reuses an existing id.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> StorageResult<u64>;

    /// Returns documents matching `options`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn find(&self, collection: &str, options: FindOptions) -> StorageResult<Vec<Value>>;

    /// Counts documents matching `filter`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn count(&self, collection: &str, filter: &Criterion) -> StorageResult<u64>;

    /// Deletes every document matching `filter`. Returns the number removed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete_many(&self, collection: &str, filter: &Criterion) -> StorageResult<u64>;

    /// Updates the first document matching `filter`.
    ///
    /// With `upsert` set and no match, a new document is built from the
    /// equality leaves of `filter` plus every set of `update` and inserted.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn update_one(
        &self,
        collection: &str,
        filter: &Criterion,
        update: &Update,
        upsert: bool,
    ) -> StorageResult<UpdateOutcome>;

    /// Shorthand for [`update_one`](DocumentStore::update_one) with `upsert` set.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn upsert_one(
        &self,
        collection: &str,
        filter: &Criterion,
        update: &Update,
    ) -> StorageResult<UpdateOutcome> {
        self.update_one(collection, filter, update, true).await
    }

    /// Runs operations in one round trip, in no particular order.
    ///
    /// A failure part-way leaves earlier operations applied.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn bulk_write(&self, collection: &str, ops: Vec<BulkOp>) -> StorageResult<BulkOutcome>;
}

/// Orders two documents by the given sort keys.
pub(crate) fn compare_documents(a: &Value, b: &Value, sort: &[Sort]) -> Ordering {
    for key in sort {
        let ordering = compare_sort_values(get_path(a, &key.path), get_path(b, &key.path));
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Missing and null sort first, then numbers, strings, objects, arrays, booleans.
fn compare_sort_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => match (a, b) {
            (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        other => other,
    }
}

/// Follows a dotted path through nested objects only.
pub(crate) fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split(PATH_SEPARATOR).try_fold(doc, |current, segment| current.get(segment))
}

/// Keeps only the listed paths (and `_id`).
pub(crate) fn project(doc: &Value, fields: &[String]) -> Value {
    let mut out = Value::Object(Map::new());
    if let Some(id) = doc.get(STORE_ID_KEY) {
        insert_path(&mut out, STORE_ID_KEY, id.clone());
    }
    for field in fields {
        if let Some(value) = get_path(doc, field) {
            insert_path(&mut out, field, value.clone());
        }
    }
    out
}

fn insert_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let mut segments = path.split(PATH_SEPARATOR).peekable();
    while let Some(segment) = segments.next() {
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_owned(), value);
            return;
        }
        current = map.entry(segment.to_owned()).or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_sort_direction_tags() {
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!("up".parse::<SortDirection>().is_err());
        assert_eq!(serde_json::to_value(SortDirection::Asc).unwrap(), json!("asc"));
        assert_eq!(SortDirection::default(), SortDirection::Desc);
    }

    #[test]
    fn test_compare_documents_multi_key() {
        let sort = vec![
            Sort::new("group", SortDirection::Asc).unwrap(),
            Sort::new("score", SortDirection::Desc).unwrap(),
        ];
        let a = json!({"group": 1, "score": 10});
        let b = json!({"group": 1, "score": 20});
        let c = json!({"group": 0, "score": 0});
        assert_eq!(compare_documents(&a, &b, &sort), Ordering::Greater);
        assert_eq!(compare_documents(&c, &a, &sort), Ordering::Less);
    }

    #[test]
    fn test_missing_sorts_first_ascending() {
        let sort = vec![Sort::new("score", SortDirection::Asc).unwrap()];
        assert_eq!(compare_documents(&json!({}), &json!({"score": 1}), &sort), Ordering::Less);
    }

    #[test]
    fn test_projection_keeps_id_and_nested_paths() {
        let doc = json!({"_id": "1", "name": "n", "profile": {"city": "c", "zip": "z"}, "x": 1});
        let projected = project(&doc, &["name".to_owned(), "profile.city".to_owned()]);
        assert_eq!(projected, json!({"_id": "1", "name": "n", "profile": {"city": "c"}}));
    }
}

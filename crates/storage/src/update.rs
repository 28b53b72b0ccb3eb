//! Update Builder: partitioned field assignments for update and upsert.
//!
//! An [`Update`] keeps three disjoint key sets:
//!
//! - `on_insert`: written only when an upsert creates the document.
//! - `always`: written on every insert or update. Always holds `updatedAt`
//!   once the update is seeded with [`Update::base`] or [`Update::upsert_base`].
//! - `unset`: removed from the document.
//!
//! Assigning a key to one set evicts it from the others, so re-applying the
//! same upsert never resets creation metadata on an existing document.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    StorageError, StorageResult,
    entity::{CREATED_AT, DELETED, Entity, UPDATED_AT, now},
    path::{ID_FIELD, PATH_SEPARATOR, ResolvePath, STORE_ID_KEY},
};

/// Field assignments for one update or upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    on_insert: Map<String, Value>,
    always: Map<String, Value>,
    unset: BTreeSet<String>,
}

impl Update {
    /// An update with no assignments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An update that refreshes `updatedAt`.
    #[must_use]
    pub fn base() -> Self {
        let mut update = Self::new();
        update.always.insert(UPDATED_AT.to_owned(), json!(now().timestamp_millis()));
        update
    }

    /// An upsert seed: identifier, creation time and `deleted = false` on
    /// insert, and `updatedAt` always.
    #[must_use]
    pub fn upsert_base(id: &str) -> Self {
        let at = json!(now().timestamp_millis());
        let mut update = Self::new();
        update.on_insert.insert(STORE_ID_KEY.to_owned(), Value::String(id.to_owned()));
        update.on_insert.insert(CREATED_AT.to_owned(), at.clone());
        update.on_insert.insert(DELETED.to_owned(), Value::Bool(false));
        update.always.insert(UPDATED_AT.to_owned(), at);
        update
    }

    /// Adds every populated declared field of `entity` to the `always` set.
    ///
    /// Skipped: unset (`null`) fields, the identifier, the creation timestamp
    /// and internal fields (names starting with `_`).
    ///
    /// # Errors
    ///
    /// Returns an error if the entity cannot report its field values or a
    /// declared field name does not resolve to a path.
    pub fn skip_null_fields<T: Entity>(mut self, entity: &T) -> StorageResult<Self> {
        for field in entity.field_values()? {
            if field.value.is_null() || is_excluded(field.name) {
                continue;
            }
            let path = field.name.resolve_path()?;
            self.assign_always(path, field.value);
        }
        Ok(self)
    }

    /// Writes `value` at `path` on every insert or update.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve or the value cannot be
    /// serialized.
    pub fn set(mut self, path: impl ResolvePath, value: impl Serialize) -> StorageResult<Self> {
        let path = path.resolve_path()?;
        self.assign_always(path, serde_json::to_value(value)?);
        Ok(self)
    }

    /// Writes `value` at `path` only when an upsert inserts the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve, the value cannot be
    /// serialized, or the path is `updatedAt` (which must stay in `always`).
    pub fn set_on_insert(
        mut self,
        path: impl ResolvePath,
        value: impl Serialize,
    ) -> StorageResult<Self> {
        let path = path.resolve_path()?;
        if path == UPDATED_AT && self.always.contains_key(UPDATED_AT) {
            return Err(StorageError::validation("updatedAt is written on every update"));
        }
        let value = serde_json::to_value(value)?;
        self.always.remove(&path);
        self.unset.remove(&path);
        self.on_insert.insert(path, value);
        Ok(self)
    }

    /// Removes the field at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not resolve, or names the identifier
    /// or `updatedAt`.
    pub fn unset(mut self, path: impl ResolvePath) -> StorageResult<Self> {
        let path = path.resolve_path()?;
        if path == STORE_ID_KEY || path == UPDATED_AT {
            return Err(StorageError::validation(format!("{path} cannot be unset")));
        }
        self.always.remove(&path);
        self.on_insert.remove(&path);
        self.unset.insert(path);
        Ok(self)
    }

    /// Assignments applied only on insert.
    #[must_use]
    pub fn on_insert(&self) -> &Map<String, Value> {
        &self.on_insert
    }

    /// Assignments applied on every write.
    #[must_use]
    pub fn always(&self) -> &Map<String, Value> {
        &self.always
    }

    /// Paths removed by the update.
    #[must_use]
    pub fn unset_paths(&self) -> &BTreeSet<String> {
        &self.unset
    }

    /// Returns `true` if the update assigns nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.on_insert.is_empty() && self.always.is_empty() && self.unset.is_empty()
    }

    /// Applies the update to a document in place.
    ///
    /// `inserted` selects whether the `on_insert` set is written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] if the document is not an object or
    /// a path runs through a non-object value.
    pub fn apply(&self, doc: &mut Value, inserted: bool) -> StorageResult<()> {
        if inserted {
            for (path, value) in &self.on_insert {
                write_path(doc, path, value.clone())?;
            }
        }
        for (path, value) in &self.always {
            write_path(doc, path, value.clone())?;
        }
        for path in &self.unset {
            remove_path(doc, path);
        }
        Ok(())
    }

    /// Renders the update as a Mongo-style update document.
    #[must_use]
    pub fn to_update_document(&self) -> Value {
        let mut doc = Map::new();
        if !self.on_insert.is_empty() {
            doc.insert("$setOnInsert".into(), Value::Object(self.on_insert.clone()));
        }
        if !self.always.is_empty() {
            doc.insert("$set".into(), Value::Object(self.always.clone()));
        }
        if !self.unset.is_empty() {
            let unset = self.unset.iter().map(|p| (p.clone(), Value::String(String::new())));
            doc.insert("$unset".into(), Value::Object(unset.collect()));
        }
        Value::Object(doc)
    }

    fn assign_always(&mut self, path: String, value: Value) {
        self.on_insert.remove(&path);
        self.unset.remove(&path);
        self.always.insert(path, value);
    }
}

fn is_excluded(name: &str) -> bool {
    name == ID_FIELD || name == CREATED_AT || name.starts_with('_')
}

pub(crate) fn write_path(doc: &mut Value, path: &str, value: Value) -> StorageResult<()> {
    let mut segments = path.split(PATH_SEPARATOR).peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        let Value::Object(map) = current else {
            return Err(StorageError::validation(format!(
                "cannot write '{path}': '{segment}' is not inside an object"
            )));
        };
        if segments.peek().is_none() {
            map.insert(segment.to_owned(), value);
            return Ok(());
        }
        current = map.entry(segment.to_owned()).or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

fn remove_path(doc: &mut Value, path: &str) {
    let Some((parent, leaf)) = path.rsplit_once(PATH_SEPARATOR) else {
        if let Value::Object(map) = doc {
            map.remove(path);
        }
        return;
    };
    let mut current = doc;
    for segment in parent.split(PATH_SEPARATOR) {
        match current.get_mut(segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(leaf);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        entity::{BaseDocument, FieldValue},
        path::Field,
    };

    #[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
    struct Note {
        #[serde(flatten)]
        base: BaseDocument,
        title: Option<String>,
        body: Option<String>,
        #[serde(rename = "_version")]
        version: Option<u32>,
    }

    impl Note {
        const TITLE: Field<Note> = Field::new("title");
        const BODY: Field<Note> = Field::new("body");
        const VERSION: Field<Note> = Field::new("_version");
        const CREATED: Field<Note> = Field::new("createdAt");
    }

    impl Entity for Note {
        const COLLECTION: &'static str = "notes";

        fn base(&self) -> &BaseDocument {
            &self.base
        }

        fn base_mut(&mut self) -> &mut BaseDocument {
            &mut self.base
        }

        fn field_values(&self) -> StorageResult<Vec<FieldValue>> {
            Ok(vec![
                Self::TITLE.value_of(&self.title)?,
                Self::BODY.value_of(&self.body)?,
                Self::VERSION.value_of(&self.version)?,
                Self::CREATED.value_of(&self.base.created_at.map(|t| t.timestamp_millis()))?,
            ])
        }
    }

    #[test]
    fn test_skip_null_only_takes_populated_fields() {
        let mut note = Note { title: Some("hello".into()), version: Some(3), ..Note::default() };
        note.base.created_at = Some(now());
        let update = Update::base().skip_null_fields(&note).unwrap();

        assert_eq!(update.always().get("title"), Some(&json!("hello")));
        assert!(!update.always().contains_key("body"));
        assert!(!update.always().contains_key("_version"));
        assert!(!update.always().contains_key("createdAt"));
        assert!(update.always().contains_key(UPDATED_AT));
    }

    #[test]
    fn test_upsert_base_partition() {
        let update = Update::upsert_base("abc");
        assert_eq!(update.on_insert().get("_id"), Some(&json!("abc")));
        assert_eq!(update.on_insert().get("deleted"), Some(&json!(false)));
        assert!(update.on_insert().contains_key(CREATED_AT));
        assert!(update.always().contains_key(UPDATED_AT));
        assert_eq!(update.on_insert().get(CREATED_AT), update.always().get(UPDATED_AT));
    }

    #[test]
    fn test_sets_stay_disjoint() {
        let update = Update::new()
            .set_on_insert("status", "new")
            .unwrap()
            .set("status", "open")
            .unwrap()
            .unset("legacy")
            .unwrap()
            .set("legacy", 1)
            .unwrap();

        assert!(!update.on_insert().contains_key("status"));
        assert_eq!(update.always().get("status"), Some(&json!("open")));
        assert!(update.unset_paths().is_empty());
    }

    #[test]
    fn test_updated_at_cannot_move_to_insert_only() {
        assert!(Update::base().set_on_insert(UPDATED_AT, 1).is_err());
        assert!(Update::base().unset(UPDATED_AT).is_err());
        assert!(Update::base().unset("id").is_err());
    }

    #[test]
    fn test_apply_on_update_skips_insert_set() {
        let update = Update::upsert_base("1").set("profile.city", "Oslo").unwrap();
        let mut existing = json!({"_id": "1", "createdAt": 5, "profile": {"zip": "0150"}});
        update.apply(&mut existing, false).unwrap();

        assert_eq!(existing["createdAt"], json!(5));
        assert_eq!(existing["profile"], json!({"zip": "0150", "city": "Oslo"}));
        assert!(existing.get(UPDATED_AT).is_some());
    }

    #[test]
    fn test_apply_on_insert_writes_everything() {
        let update = Update::upsert_base("1").set("name", "x").unwrap();
        let mut fresh = json!({});
        update.apply(&mut fresh, true).unwrap();
        assert_eq!(fresh["_id"], json!("1"));
        assert_eq!(fresh["deleted"], json!(false));
        assert_eq!(fresh["name"], json!("x"));
    }

    #[test]
    fn test_apply_unset_nested() {
        let update = Update::new().unset("profile.zip").unwrap();
        let mut doc = json!({"profile": {"zip": "1", "city": "Oslo"}});
        update.apply(&mut doc, false).unwrap();
        assert_eq!(doc, json!({"profile": {"city": "Oslo"}}));
    }

    #[test]
    fn test_apply_through_scalar_fails() {
        let update = Update::new().set("name.first", "x").unwrap();
        let mut doc = json!({"name": "flat"});
        assert!(matches!(update.apply(&mut doc, false), Err(StorageError::Validation { .. })));
    }

    #[test]
    fn test_update_document_shape() {
        let update = Update::new().set("a", 1).unwrap().set_on_insert("b", 2).unwrap();
        let update = update.unset("c").unwrap();
        assert_eq!(
            update.to_update_document(),
            json!({"$set": {"a": 1}, "$setOnInsert": {"b": 2}, "$unset": {"c": ""}})
        );
    }
}

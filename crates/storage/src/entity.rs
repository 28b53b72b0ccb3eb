//! Entity base and the declared-field contract used by skip-null updates.
//!
//! Every stored type embeds a [`BaseDocument`] (flattened, so its fields sit
//! at the top level of the stored document) and implements [`Entity`].
//!
//! ```
//! use microbase_storage::{
//!     StorageResult,
//!     entity::{BaseDocument, Entity, FieldValue},
//!     path::Field,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Tenant {
//!     #[serde(flatten)]
//!     base: BaseDocument,
//!     #[serde(default)]
//!     name: Option<String>,
//! }
//!
//! impl Tenant {
//!     const NAME: Field<Tenant> = Field::new("name");
//! }
//!
//! impl Entity for Tenant {
//!     const COLLECTION: &'static str = "tenants";
//!
//!     fn base(&self) -> &BaseDocument {
//!         &self.base
//!     }
//!
//!     fn base_mut(&mut self) -> &mut BaseDocument {
//!         &mut self.base
//!     }
//!
//!     fn field_values(&self) -> StorageResult<Vec<FieldValue>> {
//!         Ok(vec![Self::NAME.value_of(&self.name)?])
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{StorageResult, id::IdGenerator, path::Field};

/// Storage name of the creation timestamp.
pub const CREATED_AT: &str = "createdAt";

/// Storage name of the last-modification timestamp.
pub const UPDATED_AT: &str = "updatedAt";

/// Storage name of the soft-delete flag.
pub const DELETED: &str = "deleted";

/// Fields shared by every stored document.
///
/// `deleted` is a soft-delete marker. The repository stores it but never
/// filters on it; callers add `deleted = false` to their criteria themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseDocument {
    /// Globally unique id, assigned once at creation.
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Creation time, millisecond resolution.
    #[serde(
        rename = "createdAt",
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time, millisecond resolution.
    #[serde(
        rename = "updatedAt",
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
}

impl BaseDocument {
    /// Typed accessor for the identifier.
    pub const ID: Field<BaseDocument> = Field::new("id");
    /// Typed accessor for the creation timestamp.
    pub const CREATED_AT: Field<BaseDocument> = Field::new(CREATED_AT);
    /// Typed accessor for the modification timestamp.
    pub const UPDATED_AT: Field<BaseDocument> = Field::new(UPDATED_AT);
    /// Typed accessor for the soft-delete flag.
    pub const DELETED: Field<BaseDocument> = Field::new(DELETED);

    /// Prepares a new document for insertion: assigns an id when none is set
    /// and stamps both timestamps with the same instant.
    pub fn create_build(&mut self, ids: &IdGenerator) {
        if self.id.trim().is_empty() {
            self.id = ids.next_id_string();
        }
        let now = now();
        self.created_at = Some(now);
        self.updated_at = Some(now);
    }

    /// Refreshes the modification timestamp.
    pub fn update_build(&mut self) {
        self.updated_at = Some(now());
    }

    /// Returns `true` when no id has been assigned yet.
    #[must_use]
    pub fn has_blank_id(&self) -> bool {
        self.id.trim().is_empty()
    }
}

/// Current time truncated to the millisecond resolution timestamps are
/// stored with, so values read back compare equal to values written.
#[must_use]
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// One declared field of an entity and its current value.
///
/// `Value::Null` means the field is unset and is skipped by skip-null updates.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// Storage name of the field.
    pub name: &'static str,
    /// Current value in storage representation.
    pub value: Value,
}

impl<E> Field<E> {
    /// Pairs this field with a value, converting it to storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`](crate::StorageError::Serialization)
    /// if the value cannot be represented as JSON.
    pub fn value_of<V: Serialize + ?Sized>(&self, value: &V) -> StorageResult<FieldValue> {
        Ok(FieldValue { name: self.name(), value: serde_json::to_value(value)? })
    }
}

/// A document type managed by a [`Repository`](crate::repository::Repository).
///
/// `field_values` replaces runtime reflection: it lists the type's own
/// declared fields (not the [`BaseDocument`] ones) with their current values.
/// Fields left `None` must report `Value::Null`.
///
/// Fields should tolerate being absent on read (`#[serde(default)]`), since
/// projected queries return partial documents.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the collection the entity is stored in.
    const COLLECTION: &'static str;

    /// Shared base fields.
    fn base(&self) -> &BaseDocument;

    /// Mutable access to the shared base fields.
    fn base_mut(&mut self) -> &mut BaseDocument;

    /// The entity's own declared fields and their values.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be converted to storage representation.
    fn field_values(&self) -> StorageResult<Vec<FieldValue>>;

    /// The entity id, empty if not yet assigned.
    fn id(&self) -> &str {
        &self.base().id
    }
}

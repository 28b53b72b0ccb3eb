//! Field-path resolution.
//!
//! Entities declare their storable fields as typed [`Field`] constants, so a
//! criteria or update call names a field at compile time instead of by a
//! free-form string:
//!
//! ```
//! use microbase_storage::path::{Field, FieldPath, ResolvePath};
//!
//! struct Order;
//! struct Line;
//!
//! impl Order {
//!     const ID: Field<Order> = Field::new("id");
//!     const LINES: Field<Order> = Field::new("lines");
//! }
//! impl Line {
//!     const SKU: Field<Line> = Field::new("sku");
//! }
//!
//! assert_eq!(Order::ID.resolve_path()?, "_id");
//! assert_eq!(FieldPath::of(Order::LINES).then(Line::SKU).resolve_path()?, "lines.sku");
//! assert_eq!(
//!     FieldPath::of(Order::LINES).then(Line::SKU).upper_case([1]).resolve_path()?,
//!     "lines.Sku"
//! );
//! # Ok::<(), microbase_storage::StorageError>(())
//! ```
//!
//! Resolution rules, applied per segment:
//!
//! 1. The segment must be non-empty, contain no `.` or whitespace and not start with `$`;
//!    otherwise resolution fails with [`StorageError::PathResolution`].
//! 2. The entity identifier (`id`) is rewritten to the store's reserved key `_id`.
//! 3. If the segment's zero-based position is listed in the override set, its first character is
//!    upper-cased.

use std::{collections::BTreeSet, fmt, marker::PhantomData};

use crate::{StorageError, StorageResult};

/// Name of the identifier field on every entity.
pub const ID_FIELD: &str = "id";

/// Reserved key under which the store keeps document identifiers.
pub const STORE_ID_KEY: &str = "_id";

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// A typed accessor for one storable field of entity `E`.
///
/// The storage name is fixed at compile time, so resolution is a pure lookup.
pub struct Field<E> {
    name: &'static str,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Field<E> {
    /// Declares a field with the given storage name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, _entity: PhantomData }
    }

    /// Returns the declared storage name, before any rewriting.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<E> Clone for Field<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Field<E> {}

impl<E> fmt::Debug for Field<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

impl<E> PartialEq for Field<E> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<E> Eq for Field<E> {}

/// A multi-segment path built from typed fields, e.g. `lines.sku`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<&'static str>,
    upper_case: BTreeSet<usize>,
}

impl FieldPath {
    /// Starts a path at the given field.
    #[must_use]
    pub fn of<E>(field: Field<E>) -> Self {
        Self { segments: vec![field.name()], upper_case: BTreeSet::new() }
    }

    /// Appends a nested field.
    #[must_use]
    pub fn then<E>(mut self, field: Field<E>) -> Self {
        self.segments.push(field.name());
        self
    }

    /// Marks segment positions whose first character must be upper-cased.
    ///
    /// Positions past the end of the path are ignored.
    #[must_use]
    pub fn upper_case(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.upper_case.extend(positions);
        self
    }

    /// Number of segments in the path.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if the path has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl<E> From<Field<E>> for FieldPath {
    fn from(field: Field<E>) -> Self {
        Self::of(field)
    }
}

/// Anything that can be turned into a dotted storage path.
pub trait ResolvePath {
    /// Resolves to the dotted storage path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathResolution`] if any segment is unusable.
    fn resolve_path(&self) -> StorageResult<String>;
}

impl<E> ResolvePath for Field<E> {
    fn resolve_path(&self) -> StorageResult<String> {
        resolve_segment(self.name, false)
    }
}

impl ResolvePath for FieldPath {
    fn resolve_path(&self) -> StorageResult<String> {
        resolve_segments(self.segments.iter().copied(), &self.upper_case)
    }
}

/// Raw dotted paths, as named by callers at runtime (e.g. a roll page's
/// keyword field). Each segment goes through the same rules as typed fields.
impl ResolvePath for str {
    fn resolve_path(&self) -> StorageResult<String> {
        resolve_segments(self.split(PATH_SEPARATOR), &BTreeSet::new())
    }
}

impl ResolvePath for String {
    fn resolve_path(&self) -> StorageResult<String> {
        self.as_str().resolve_path()
    }
}

impl<T: ResolvePath + ?Sized> ResolvePath for &T {
    fn resolve_path(&self) -> StorageResult<String> {
        (**self).resolve_path()
    }
}

fn resolve_segments<'a>(
    segments: impl Iterator<Item = &'a str>,
    upper_case: &BTreeSet<usize>,
) -> StorageResult<String> {
    let mut path = String::new();
    for (position, segment) in segments.enumerate() {
        if position > 0 {
            path.push(PATH_SEPARATOR);
        }
        path.push_str(&resolve_segment(segment, upper_case.contains(&position))?);
    }
    if path.is_empty() {
        return Err(StorageError::path_resolution("", "path has no segments"));
    }
    Ok(path)
}

fn resolve_segment(segment: &str, upper_first: bool) -> StorageResult<String> {
    if segment.is_empty() {
        return Err(StorageError::path_resolution(segment, "segment is empty"));
    }
    if segment.contains(PATH_SEPARATOR) {
        return Err(StorageError::path_resolution(segment, "segment contains '.'"));
    }
    if segment.starts_with('$') {
        return Err(StorageError::path_resolution(segment, "segment starts with '$'"));
    }
    if segment.chars().any(char::is_whitespace) {
        return Err(StorageError::path_resolution(segment, "segment contains whitespace"));
    }

    let name = if segment == ID_FIELD { STORE_ID_KEY } else { segment };
    if upper_first {
        Ok(capitalize_first(name))
    } else {
        Ok(name.to_owned())
    }
}

fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Splits a comma-joined list, dropping blank entries.
///
/// `"1,2,3,,,9,"` becomes `["1", "2", "3", "9"]`; entries are trimmed.
#[must_use]
pub fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

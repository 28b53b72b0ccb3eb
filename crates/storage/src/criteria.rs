//! Criteria Builder: boolean filter trees over resolved field paths.
//!
//! [`Criteria`] is a fluent builder with a field cursor. `field` (or `and`)
//! selects a path, and the next operator call adds a leaf on it. Every leaf
//! added to one builder is conjoined:
//!
//! ```
//! use microbase_storage::criteria::{Criteria, SearchMode};
//! use serde_json::json;
//!
//! let criterion = Criteria::new()
//!     .field("status")
//!     .is("active")
//!     .and("name")
//!     .keyword(SearchMode::ComplexDim, ["a.b"])
//!     .build()?;
//!
//! assert!(criterion.matches(&json!({"status": "active", "name": "xA.By"})));
//! assert!(!criterion.matches(&json!({"status": "active", "name": "aXb"})));
//! # Ok::<(), microbase_storage::StorageError>(())
//! ```
//!
//! Errors (an unresolvable path, a value that cannot be serialized, a
//! malformed pattern) are recorded on the builder and surface from
//! [`Criteria::build`], so chains never need intermediate `?`.

use std::{cmp::Ordering, fmt, str::FromStr};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    StorageError, StorageResult,
    path::{PATH_SEPARATOR, ResolvePath},
};

/// Characters escaped by [`escape_regex`].
pub const REGEX_SPECIAL_CHARS: &[char] =
    &['\\', '$', '(', ')', '*', '+', '.', '[', ']', '?', '^', '{', '}', '|'];

/// Escapes regex metacharacters so the keyword only matches literally.
///
/// ```
/// use microbase_storage::criteria::escape_regex;
/// assert_eq!(escape_regex("a.b*"), r"a\.b\*");
/// ```
#[must_use]
pub fn escape_regex(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for ch in keyword.chars() {
        if REGEX_SPECIAL_CHARS.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// How a keyword filter turns its values into a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SearchMode {
    /// Exact match against any of the values (`in`). No escaping.
    #[default]
    #[serde(rename = "exact")]
    Exact,
    /// Raw substring regex built from the first value only.
    #[serde(rename = "dim")]
    Dim,
    /// Escaped, case-insensitive substring match on the first value.
    #[serde(rename = "complexDim")]
    ComplexDim,
}

impl SearchMode {
    /// Wire tag of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Dim => "dim",
            Self::ComplexDim => "complexDim",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = StorageError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "exact" => Ok(Self::Exact),
            "dim" => Ok(Self::Dim),
            "complexDim" => Ok(Self::ComplexDim),
            other => Err(StorageError::validation(format!("unknown search type '{other}'"))),
        }
    }
}

/// A compiled regular expression leaf value.
///
/// Equality compares the source and flags, not the compiled automaton.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    compiled: Regex,
}

impl Pattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] if the pattern is not a valid regex.
    pub fn new(source: impl Into<String>, case_insensitive: bool) -> StorageResult<Self> {
        let source = source.into();
        let compiled = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| StorageError::validation(format!("invalid pattern '{source}': {e}")))?;
        Ok(Self { source, case_insensitive, compiled })
    }

    /// The pattern as written.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether matching ignores case.
    #[must_use]
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Tests a string against the pattern.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

/// A node of a filter tree.
///
/// Leaf paths are already resolved dotted storage paths.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Criterion {
    /// Field equals value. A `null` value also matches a missing field.
    Eq { path: String, value: Value },
    /// Negation of [`Criterion::Eq`].
    Ne { path: String, value: Value },
    /// Field equals any of the values. Empty matches nothing.
    In { path: String, values: Vec<Value> },
    /// Field equals none of the values. Empty matches everything.
    Nin { path: String, values: Vec<Value> },
    /// Array field contains every value. Empty matches nothing.
    All { path: String, values: Vec<Value> },
    /// Field greater than value.
    Gt { path: String, value: Value },
    /// Field greater than or equal to value.
    Gte { path: String, value: Value },
    /// Field less than value.
    Lt { path: String, value: Value },
    /// Field less than or equal to value.
    Lte { path: String, value: Value },
    /// Field presence.
    Exists { path: String, exists: bool },
    /// String field matches a regex.
    Regex { path: String, pattern: Pattern },
    /// Some element of an array field matches the nested criterion.
    ElemMatch { path: String, criterion: Box<Criterion> },
    /// Negation of any criterion.
    Not(Box<Criterion>),
    /// All children match. No children matches everything.
    And(Vec<Criterion>),
    /// Any child matches. No children matches nothing.
    Or(Vec<Criterion>),
}

impl Criterion {
    /// The criterion that matches every document.
    #[must_use]
    pub fn match_all() -> Self {
        Self::And(Vec::new())
    }

    /// Returns `true` for the match-everything root.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::And(children) if children.is_empty())
    }

    /// Evaluates the criterion against a JSON document.
    ///
    /// Paths fan out over arrays, so `lines.sku` reaches the `sku` of every
    /// element of `lines`. Leaf comparisons succeed when any reached value (or
    /// any element of a reached array) satisfies them. Ordering comparisons
    /// only succeed between numbers, strings or booleans of the same kind.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::Eq { path, value } => eq_matches(doc, path, value),
            Self::Ne { path, value } => !eq_matches(doc, path, value),
            Self::In { path, values } => values.iter().any(|v| eq_matches(doc, path, v)),
            Self::Nin { path, values } => !values.iter().any(|v| eq_matches(doc, path, v)),
            Self::All { path, values } => {
                let found = expand(&lookup(doc, path));
                !values.is_empty()
                    && values.iter().all(|v| found.iter().any(|f| values_equal(f, v)))
            },
            Self::Gt { path, value } => ordered(doc, path, value, Ordering::is_gt),
            Self::Gte { path, value } => ordered(doc, path, value, Ordering::is_ge),
            Self::Lt { path, value } => ordered(doc, path, value, Ordering::is_lt),
            Self::Lte { path, value } => ordered(doc, path, value, Ordering::is_le),
            Self::Exists { path, exists } => !lookup(doc, path).is_empty() == *exists,
            Self::Regex { path, pattern } => expand(&lookup(doc, path))
                .iter()
                .any(|v| v.as_str().is_some_and(|s| pattern.is_match(s))),
            Self::ElemMatch { path, criterion } => lookup(doc, path).iter().any(|v| {
                v.as_array().is_some_and(|items| items.iter().any(|item| criterion.matches(item)))
            }),
            Self::Not(inner) => !inner.matches(doc),
            Self::And(children) => children.iter().all(|c| c.matches(doc)),
            Self::Or(children) => children.iter().any(|c| c.matches(doc)),
        }
    }

    /// Renders the criterion as a Mongo-style filter document.
    ///
    /// The match-everything root renders as `{}`.
    #[must_use]
    pub fn to_filter_document(&self) -> Value {
        match self {
            Self::Eq { path, value } => single(path, value.clone()),
            Self::Ne { path, value } => single(path, json!({ "$ne": value })),
            Self::In { path, values } => single(path, json!({ "$in": values })),
            Self::Nin { path, values } => single(path, json!({ "$nin": values })),
            Self::All { path, values } => single(path, json!({ "$all": values })),
            Self::Gt { path, value } => single(path, json!({ "$gt": value })),
            Self::Gte { path, value } => single(path, json!({ "$gte": value })),
            Self::Lt { path, value } => single(path, json!({ "$lt": value })),
            Self::Lte { path, value } => single(path, json!({ "$lte": value })),
            Self::Exists { path, exists } => single(path, json!({ "$exists": exists })),
            Self::Regex { path, pattern } => {
                let mut operator = Map::new();
                operator.insert("$regex".into(), Value::String(pattern.source.clone()));
                if pattern.case_insensitive {
                    operator.insert("$options".into(), Value::String("i".into()));
                }
                single(path, Value::Object(operator))
            },
            Self::ElemMatch { path, criterion } => {
                single(path, json!({ "$elemMatch": criterion.to_filter_document() }))
            },
            Self::Not(inner) => json!({ "$nor": [inner.to_filter_document()] }),
            Self::And(children) if children.is_empty() => Value::Object(Map::new()),
            Self::And(children) => json!({ "$and": render_all(children) }),
            Self::Or(children) => json!({ "$or": render_all(children) }),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_filter_document())
    }
}

fn single(path: &str, condition: Value) -> Value {
    let mut map = Map::new();
    map.insert(path.to_owned(), condition);
    Value::Object(map)
}

fn render_all(children: &[Criterion]) -> Vec<Value> {
    children.iter().map(Criterion::to_filter_document).collect()
}

/// Values reached by a dotted path, fanning out over arrays.
fn lookup<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split(PATH_SEPARATOR) {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(segment)),
                Value::Array(items) => {
                    if let Ok(index) = segment.parse::<usize>() {
                        next.extend(items.get(index));
                    }
                    next.extend(items.iter().filter_map(|item| item.get(segment)));
                },
                _ => {},
            }
        }
        current = next;
    }
    current
}

/// Reached values plus the elements of any reached arrays.
fn expand<'a>(found: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(found.len());
    for value in found {
        out.push(*value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn eq_matches(doc: &Value, path: &str, expected: &Value) -> bool {
    let found = lookup(doc, path);
    if expected.is_null() && found.is_empty() {
        return true;
    }
    expand(&found).iter().any(|v| values_equal(v, expected))
}

fn ordered(doc: &Value, path: &str, bound: &Value, accept: fn(Ordering) -> bool) -> bool {
    expand(&lookup(doc, path)).iter().any(|v| compare(v, bound).is_some_and(accept))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Orders two scalars of the same kind; `None` for mixed kinds or composites.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                Some(x.cmp(&y))
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                Some(x.cmp(&y))
            } else {
                x.as_f64()?.partial_cmp(&y.as_f64()?)
            }
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Fluent builder producing a [`Criterion`].
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    children: Vec<Criterion>,
    cursor: Option<String>,
    error: Option<StorageError>,
}

impl Criteria {
    /// Starts an empty builder; building it yields the match-everything root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the field the next operator applies to.
    #[must_use]
    pub fn field(mut self, path: impl ResolvePath) -> Self {
        match path.resolve_path() {
            Ok(resolved) => self.cursor = Some(resolved),
            Err(e) => {
                self.cursor = None;
                self.record(e);
            },
        }
        self
    }

    /// Alias of [`Criteria::field`] that reads naturally mid-chain.
    #[must_use]
    pub fn and(self, path: impl ResolvePath) -> Self {
        self.field(path)
    }

    /// Field equals value.
    #[must_use]
    pub fn is(self, value: impl Serialize) -> Self {
        self.leaf_value(value, |path, value| Criterion::Eq { path, value })
    }

    /// Field does not equal value.
    #[must_use]
    pub fn ne(self, value: impl Serialize) -> Self {
        self.leaf_value(value, |path, value| Criterion::Ne { path, value })
    }

    /// Field equals any of the values.
    #[must_use]
    pub fn is_in<V: Serialize>(self, values: impl IntoIterator<Item = V>) -> Self {
        self.leaf_values(values, |path, values| Criterion::In { path, values })
    }

    /// Field equals none of the values.
    #[must_use]
    pub fn not_in<V: Serialize>(self, values: impl IntoIterator<Item = V>) -> Self {
        self.leaf_values(values, |path, values| Criterion::Nin { path, values })
    }

    /// Array field contains all of the values.
    #[must_use]
    pub fn all<V: Serialize>(self, values: impl IntoIterator<Item = V>) -> Self {
        self.leaf_values(values, |path, values| Criterion::All { path, values })
    }

    /// Field greater than value.
    #[must_use]
    pub fn gt(self, value: impl Serialize) -> Self {
        self.leaf_value(value, |path, value| Criterion::Gt { path, value })
    }

    /// Field greater than or equal to value.
    #[must_use]
    pub fn gte(self, value: impl Serialize) -> Self {
        self.leaf_value(value, |path, value| Criterion::Gte { path, value })
    }

    /// Field less than value.
    #[must_use]
    pub fn lt(self, value: impl Serialize) -> Self {
        self.leaf_value(value, |path, value| Criterion::Lt { path, value })
    }

    /// Field less than or equal to value.
    #[must_use]
    pub fn lte(self, value: impl Serialize) -> Self {
        self.leaf_value(value, |path, value| Criterion::Lte { path, value })
    }

    /// Field presence.
    #[must_use]
    pub fn exists(self, exists: bool) -> Self {
        self.leaf(|path| Criterion::Exists { path, exists })
    }

    /// Case-sensitive raw regex on the field.
    #[must_use]
    pub fn regex(self, pattern: &str) -> Self {
        match Pattern::new(pattern, false) {
            Ok(pattern) => self.regex_pattern(pattern),
            Err(e) => self.failed(e),
        }
    }

    /// Regex on the field with a precompiled pattern.
    #[must_use]
    pub fn regex_pattern(self, pattern: Pattern) -> Self {
        self.leaf(|path| Criterion::Regex { path, pattern })
    }

    /// Keyword filter on the field using the given search mode.
    ///
    /// [`SearchMode::Exact`] matches any of the values. The fuzzy modes only
    /// use the first value; with no values at all nothing is added.
    #[must_use]
    pub fn keyword<V: AsRef<str>>(
        self,
        mode: SearchMode,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let mut values = values.into_iter();
        match mode {
            SearchMode::Exact => {
                let exact: Vec<String> = values.map(|v| v.as_ref().to_owned()).collect();
                self.is_in(exact)
            },
            SearchMode::Dim => match values.next() {
                Some(first) => self.regex(first.as_ref()),
                None => self,
            },
            SearchMode::ComplexDim => match values.next() {
                Some(first) => {
                    let source = format!("^.*{}.*$", escape_regex(first.as_ref()));
                    match Pattern::new(source, true) {
                        Ok(pattern) => self.regex_pattern(pattern),
                        Err(e) => self.failed(e),
                    }
                },
                None => self,
            },
        }
    }

    /// Some element of the array field matches every leaf of `nested`.
    ///
    /// Paths inside `nested` are relative to the array element.
    #[must_use]
    pub fn elem_match(mut self, nested: Criteria) -> Self {
        match nested.build() {
            Ok(criterion) => {
                self.leaf(|path| Criterion::ElemMatch { path, criterion: Box::new(criterion) })
            },
            Err(e) => {
                self.cursor = None;
                self.failed(e)
            },
        }
    }

    /// Adds the negation of `nested`.
    #[must_use]
    pub fn not(self, nested: Criteria) -> Self {
        match nested.build() {
            Ok(criterion) => self.push(Criterion::Not(Box::new(criterion))),
            Err(e) => self.failed(e),
        }
    }

    /// Adds the conjunction of `nested`. With no nested criteria nothing is added.
    #[must_use]
    pub fn and_operator(self, nested: impl IntoIterator<Item = Criteria>) -> Self {
        self.composite(nested, Criterion::And)
    }

    /// Adds the disjunction of `nested`. With no nested criteria nothing is added.
    #[must_use]
    pub fn or_operator(self, nested: impl IntoIterator<Item = Criteria>) -> Self {
        self.composite(nested, Criterion::Or)
    }

    /// Finishes the builder.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded while building: a
    /// [`StorageError::PathResolution`] for a bad field, a
    /// [`StorageError::Validation`] for a malformed pattern or an operator
    /// called with no field selected, or a [`StorageError::Serialization`] for
    /// an unrepresentable value.
    pub fn build(self) -> StorageResult<Criterion> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut children = self.children;
        Ok(if children.len() == 1 { children.remove(0) } else { Criterion::And(children) })
    }

    fn composite(
        mut self,
        nested: impl IntoIterator<Item = Criteria>,
        wrap: fn(Vec<Criterion>) -> Criterion,
    ) -> Self {
        let mut children = Vec::new();
        for criteria in nested {
            match criteria.build() {
                Ok(criterion) => children.push(criterion),
                Err(e) => {
                    self.record(e);
                    return self;
                },
            }
        }
        if children.is_empty() {
            return self;
        }
        self.push(wrap(children))
    }

    fn leaf(mut self, make: impl FnOnce(String) -> Criterion) -> Self {
        match self.cursor.take() {
            Some(path) => {
                self.cursor = Some(path.clone());
                self.push(make(path))
            },
            None => {
                if self.error.is_none() {
                    self.record(StorageError::validation("criteria operator used before a field"));
                }
                self
            },
        }
    }

    fn leaf_value(self, value: impl Serialize, make: fn(String, Value) -> Criterion) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => self.leaf(|path| make(path, value)),
            Err(e) => self.failed(e.into()),
        }
    }

    fn leaf_values<V: Serialize>(
        self,
        values: impl IntoIterator<Item = V>,
        make: fn(String, Vec<Value>) -> Criterion,
    ) -> Self {
        match values.into_iter().map(serde_json::to_value).collect::<Result<Vec<_>, _>>() {
            Ok(values) => self.leaf(|path| make(path, values)),
            Err(e) => self.failed(e.into()),
        }
    }

    fn push(mut self, criterion: Criterion) -> Self {
        self.children.push(criterion);
        self
    }

    fn failed(mut self, error: StorageError) -> Self {
        self.record(error);
        self
    }

    fn record(&mut self, error: StorageError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

//! Roll page parameters and results.
//!
//! A roll page is a filtered, sorted, paginated query with an optional total
//! count. [`RollPageParam`] is the caller-facing parameter surface (it
//! deserializes from the camelCase shape callers send) and
//! [`RollPageResult`] carries the page back.

use serde::{Deserialize, Serialize};

use crate::{
    StorageError, StorageResult,
    criteria::{Criteria, SearchMode},
    document::SortDirection,
    path::{STORE_ID_KEY, split_list},
};

/// `total` value when the count was not requested.
pub const TOTAL_NOT_COMPUTED: i64 = -1;

/// Parameters of a roll page query.
///
/// Every filter is optional; an all-default parameter pages through the whole
/// collection sorted by the repository's default sort key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase", default)]
pub struct RollPageParam {
    /// Comma-joined id filter.
    #[builder(into)]
    pub ids: Option<String>,
    /// Explicit id filter, applied in addition to `ids`.
    #[builder(default)]
    pub id_list: Vec<String>,
    /// Field the time range applies to.
    #[builder(into)]
    pub time_type: Option<String>,
    /// Inclusive range start, epoch millis.
    pub start_time: Option<i64>,
    /// Inclusive range end, epoch millis.
    pub end_time: Option<i64>,
    /// Field the keyword filter applies to.
    #[builder(into)]
    pub keyword_type: Option<String>,
    /// Keyword search mode tag: `exact` (default), `dim` or `complexDim`.
    #[builder(into)]
    pub search_type: Option<String>,
    /// Keywords.
    #[builder(default)]
    pub keyword_list: Vec<String>,
    /// Sort field; the repository default when absent.
    #[builder(into)]
    pub sort_key: Option<String>,
    /// Sort order tag: `asc` or `desc`; the repository default when absent.
    #[builder(into)]
    pub sort_order: Option<String>,
    /// 1-based page number, default 1. Zero or negative disables paging.
    pub page_num: Option<i64>,
    /// Page size; the repository default when absent. Zero or negative
    /// disables paging.
    pub page_size: Option<i64>,
    /// Whether to compute the total number of matches.
    #[builder(default)]
    pub need_count: bool,
    /// Comma-joined projection allow-list; empty returns whole documents.
    #[builder(into)]
    pub fields: Option<String>,
}

impl RollPageParam {
    /// Assembles the filter described by the parameter.
    ///
    /// - Both id forms become independent `_id in` leaves.
    /// - The time range applies only when `time_type`, `start_time` and `end_time` are all present.
    /// - The keyword filter applies only when `keyword_type` is set and `keyword_list` is
    ///   non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for an unknown `search_type`. Path
    /// errors are recorded on the returned builder and surface when it is
    /// built.
    pub fn to_criteria(&self) -> StorageResult<Criteria> {
        let mut criteria = Criteria::new();

        let ids = self.ids.as_deref().map(split_list).unwrap_or_default();
        if !ids.is_empty() {
            criteria = criteria.field(STORE_ID_KEY).is_in(ids);
        }
        if !self.id_list.is_empty() {
            criteria = criteria.field(STORE_ID_KEY).is_in(&self.id_list);
        }

        if let (Some(field), Some(start), Some(end)) =
            (non_blank(&self.time_type), self.start_time, self.end_time)
        {
            criteria = criteria.field(field).gte(start).lte(end);
        }

        if let Some(field) = non_blank(&self.keyword_type) {
            if !self.keyword_list.is_empty() {
                let mode = self.search_mode()?;
                criteria = criteria.field(field).keyword(mode, &self.keyword_list);
            }
        }

        Ok(criteria)
    }

    /// Parsed keyword search mode, `exact` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for an unknown tag.
    pub fn search_mode(&self) -> StorageResult<SearchMode> {
        non_blank(&self.search_type).map_or(Ok(SearchMode::Exact), |tag| tag.parse())
    }

    /// Parsed sort direction, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] for an unknown tag.
    pub fn sort_direction(&self) -> StorageResult<Option<SortDirection>> {
        non_blank(&self.sort_order).map(|tag| tag.parse()).transpose()
    }

    /// Projection allow-list split from `fields`.
    #[must_use]
    pub fn projection(&self) -> Vec<String> {
        self.fields.as_deref().map(split_list).unwrap_or_default()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollPageResult<T> {
    /// Number of matches, or [`TOTAL_NOT_COMPUTED`].
    pub total: i64,
    /// Items of the page window, in sort order.
    pub list: Vec<T>,
}

impl<T> RollPageResult<T> {
    /// Returns `true` if the total was computed.
    #[must_use]
    pub fn has_total(&self) -> bool {
        self.total != TOTAL_NOT_COMPUTED
    }
}

impl<T> Default for RollPageResult<T> {
    fn default() -> Self {
        Self { total: TOTAL_NOT_COMPUTED, list: Vec::new() }
    }
}

/// Resolved paging window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub skip: u64,
    pub limit: Option<u64>,
}

impl Window {
    /// Computes the window for a 1-based page, clamping the size to `max_size`.
    /// Non-positive numbers or sizes select everything.
    pub fn of(page_num: i64, page_size: i64, max_size: u64) -> StorageResult<Self> {
        if page_num <= 0 || page_size <= 0 {
            return Ok(Self { skip: 0, limit: None });
        }
        let size = u64::try_from(page_size)
            .map_err(|_| StorageError::validation("page size out of range"))?
            .min(max_size);
        let page = u64::try_from(page_num)
            .map_err(|_| StorageError::validation("page number out of range"))?;
        let skip = (page - 1)
            .checked_mul(size)
            .ok_or_else(|| StorageError::validation("page number out of range"))?;
        Ok(Self { skip, limit: Some(size) })
    }
}

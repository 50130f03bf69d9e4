//! Pagination types and facet-result normalization.
//!
//! The document store answers a compiled pipeline with the facet shape
//! `{ data: [...], metadata: [{ total, page }] }`. [`RawQueryResult`]
//! mirrors that wire shape; [`Page`] is the normalized form handed to
//! callers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

/// A requested result window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-indexed page number.
    pub page: u64,
    /// Page size; the store returns at most this many records.
    pub page_size: u64,
}

impl PageRequest {
    /// Creates a page request.
    pub const fn new(page: u64, page_size: u64) -> Self {
        Self { page, page_size }
    }

    /// Number of records to skip before the window starts.
    pub const fn offset(&self) -> u64 {
        self.page * self.page_size
    }
}

/// Metadata side channel of a facet result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetadata {
    /// Total number of matching records, regardless of windowing.
    #[serde(default)]
    pub total: u64,
    /// Requested page number, if windowing was enabled.
    #[serde(default)]
    pub page: Option<u64>,
}

/// Facet result exactly as returned by the document store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawQueryResult {
    /// The windowed data slice.
    #[serde(default)]
    pub data: Vec<Value>,
    /// Aggregate metadata; empty when no records matched.
    #[serde(default)]
    pub metadata: Vec<RawMetadata>,
}

impl RawQueryResult {
    /// Normalizes the facet shape into a typed [`Page`].
    ///
    /// An empty metadata array (no matching records) normalizes to
    /// `total = 0` with no page number.
    pub fn normalize<T: DeserializeOwned>(self) -> CoreResult<Page<T>> {
        let pagination = match self.metadata.first() {
            Some(meta) => PageInfo {
                page: meta.page,
                total: meta.total,
            },
            None => PageInfo {
                page: None,
                total: 0,
            },
        };

        let data = self
            .data
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;

        Ok(Page { data, pagination })
    }
}

/// Normalized pagination metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Zero-indexed page number; `None` when windowing was disabled.
    pub page: Option<u64>,
    /// Total number of matching records.
    pub total: u64,
}

/// One page of typed results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Records in this window.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: PageInfo,
}

//! Query and response shapes for paginated listings.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// `?page=1&limit=20`. Missing or empty values fall back to the defaults.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PaginationQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<u32>,

    #[serde(default, deserialize_with = "empty_string_as_none")]
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<u32>,
}

impl PaginationQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(DEFAULT_PAGE)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// Number of items to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page().saturating_sub(1)) * u64::from(self.limit())
    }
}

fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let value = Option::<String>::deserialize(deserializer)?;
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(de::Error::custom),
    }
}

/// One page of items plus the total across all pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAndTotalResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl<T> ListAndTotalResponse<T> {
    pub fn new(items: Vec<T>, total: u64, query: &PaginationQuery) -> Self {
        Self {
            items,
            total,
            page: query.page(),
            limit: query.limit(),
        }
    }
}

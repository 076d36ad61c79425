//! Page/limit pagination utilities.

use serde::{Deserialize, Serialize};

/// Default page size when the client omits `limit`.
pub const DEFAULT_LIMIT: i64 = 20;

/// Hard ceiling on page size.
pub const MAX_LIMIT: i64 = 100;

/// Query-string half of a paginated request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Normalized pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    /// Normalizes raw query values: page is 1-based and at least 1,
    /// limit is clamped to [1, MAX_LIMIT].
    pub fn from_query(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        Self { page, limit }
    }

    /// Row offset for a SQL `OFFSET` clause.
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

impl From<PageQuery> for Page {
    fn from(q: PageQuery) -> Self {
        Page::from_query(q.page, q.limit)
    }
}

/// Response half of a paginated listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl PageInfo {
    pub fn new(page: Page, total: i64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + page.limit - 1) / page.limit
        };
        Self {
            page: page.page,
            limit: page.limit,
            total,
            total_pages,
        }
    }
}

//! Offset pagination shared by list operations.

use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// Page/limit pair as received from a caller.
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    #[validate(range(min = 1))]
    pub page: u32,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u32,
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// A page of results with navigation metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, request: PageRequest, total: u64) -> Self {
        let limit = u64::from(request.limit.max(1));
        let total_pages = total.div_ceil(limit);
        let page = u64::from(request.page);

        Self {
            data,
            page: request.page,
            limit: request.limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total: self.total,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        let page: Paginated<u8> = Paginated::new(vec![], PageRequest::new(1, 10), 21);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(!page.has_prev);
    }

    #[test]
    fn last_page_has_no_next() {
        let page: Paginated<u8> = Paginated::new(vec![], PageRequest::new(3, 10), 30);
        assert_eq!(page.total_pages, 3);
        assert!(!page.has_next);
        assert!(page.has_prev);
    }

    #[test]
    fn empty_result_has_zero_pages() {
        let page: Paginated<u8> = Paginated::new(vec![], PageRequest::default(), 0);
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next);
        assert!(!page.has_prev);
    }

    #[test]
    fn offset_skips_previous_pages() {
        assert_eq!(PageRequest::new(1, 20).offset(), 0);
        assert_eq!(PageRequest::new(4, 25).offset(), 75);
    }

    #[test]
    fn serializes_camel_case_metadata() {
        let page = Paginated::new(vec![1u8], PageRequest::new(1, 1), 2);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["totalPages"], 2);
        assert_eq!(json["hasNext"], true);
        assert_eq!(json["hasPrev"], false);
    }

    #[test]
    fn limit_above_maximum_fails_validation() {
        assert!(PageRequest::new(1, MAX_LIMIT + 1).validate().is_err());
        assert!(PageRequest::new(0, 10).validate().is_err());
        assert!(PageRequest::new(1, MAX_LIMIT).validate().is_ok());
    }
}

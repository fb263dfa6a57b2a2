//! Offset pagination for the admin listings.

use serde::Serialize;

/// A 1-based page request with a fixed page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    size: u32,
}

impl PageRequest {
    /// Missing or zero page numbers select the first page.
    pub fn new(page: Option<u32>, size: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            size: size.max(1),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.size)
    }
}

/// One page of rows plus the figures needed to render a pager.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(request: PageRequest, total_items: i64, items: Vec<T>) -> Self {
        Self {
            items,
            page_number: request.page(),
            page_size: request.size(),
            total_items,
            total_pages: total_pages(total_items, request.size()),
        }
    }
}

/// `ceil(total / size)`.
pub fn total_pages(total: i64, size: u32) -> i64 {
    let size = i64::from(size.max(1));
    (total.max(0) + size - 1) / size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(25, 10), 3);
        assert_eq!(total_pages(251, 250), 2);
    }

    #[test]
    fn offset_follows_page_number() {
        assert_eq!(PageRequest::new(None, 10).offset(), 0);
        assert_eq!(PageRequest::new(Some(0), 10).offset(), 0);
        assert_eq!(PageRequest::new(Some(4), 10).offset(), 30);
        assert_eq!(PageRequest::new(Some(2), 250).limit(), 250);
    }
}

//! Page arithmetic for dashboard listings

use serde::Serialize;

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET
    #[serde(skip)]
    pub offset: i64,
}

/// Clamp `requested_page` into `[1, total_pages]` and derive the offset
///
/// ```
/// use crm_engine::pagination::calculate_pagination;
///
/// let p = calculate_pagination(45, 2, 20);
/// assert_eq!((p.page, p.total_pages, p.offset), (2, 3, 20));
///
/// // Out-of-range pages are clamped
/// let p = calculate_pagination(45, 99, 20);
/// assert_eq!(p.page, 3);
/// ```
pub fn calculate_pagination(total_results: i64, requested_page: i64, page_size: i64) -> Pagination {
    let page_size = page_size.max(1);
    let total_pages = (total_results.max(0) + page_size - 1) / page_size;
    let page = requested_page.max(1).min(total_pages.max(1));

    Pagination {
        page,
        page_size,
        total_pages,
        offset: (page - 1) * page_size,
    }
}

/// One page of results with its metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_normal() {
        let p = calculate_pagination(250, 2, 100);
        assert_eq!(p.page, 2);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.offset, 100);
    }

    #[test]
    fn test_pagination_out_of_bounds() {
        let high = calculate_pagination(150, 99, 100);
        assert_eq!((high.page, high.offset), (2, 100));
        let low = calculate_pagination(150, 0, 100);
        assert_eq!((low.page, low.offset), (1, 0));
    }

    #[test]
    fn test_pagination_empty() {
        let p = calculate_pagination(0, 1, 20);
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 0);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_zero_page_size_treated_as_one() {
        let p = calculate_pagination(3, 2, 0);
        assert_eq!((p.page_size, p.total_pages, p.offset), (1, 3, 1));
    }
}

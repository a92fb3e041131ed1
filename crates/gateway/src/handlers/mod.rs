//! API handlers module

pub mod auth;
pub mod documents;
pub mod health;
pub mod notes;
pub mod patients;
pub mod users;

use serde::Deserialize;

const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

/// `?page=&per_page=` with 1-based pages
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl Pagination {
    /// Zero-based page index and clamped page size
    pub fn resolve(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1) - 1;
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        (page, per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        assert_eq!(Pagination::default().resolve(), (0, DEFAULT_PER_PAGE));
    }

    #[test]
    fn test_pagination_clamps() {
        let p = Pagination { page: Some(0), per_page: Some(10_000) };
        assert_eq!(p.resolve(), (0, MAX_PER_PAGE));

        let p = Pagination { page: Some(3), per_page: Some(0) };
        assert_eq!(p.resolve(), (2, 1));
    }
}

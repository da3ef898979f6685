use serde::Serialize;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

/// Postgres takes OFFSET and LIMIT as BIGINT; larger windows are clamped.
pub fn sql_bound(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Limited(u64),
    /// `limit=all`
    All,
}

/// Previous / next page markers returned with every list response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub prev: Option<u64>,
    pub next: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub size: PageSize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            size: PageSize::Limited(DEFAULT_LIMIT),
        }
    }
}

impl PageRequest {
    /// Missing, non-numeric or non-positive values fall back to the defaults.
    pub fn from_params(page: Option<&str>, limit: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<u64>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PAGE);

        let size = match limit.map(str::trim) {
            Some("all") => PageSize::All,
            other => PageSize::Limited(
                other
                    .and_then(|l| l.parse::<u64>().ok())
                    .filter(|l| *l > 0)
                    .unwrap_or(DEFAULT_LIMIT),
            ),
        };

        Self { page, size }
    }

    pub fn skip(&self) -> u64 {
        match self.size {
            PageSize::Limited(limit) => (self.page - 1).saturating_mul(limit),
            PageSize::All => 0,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self.size {
            PageSize::Limited(limit) => Some(limit),
            PageSize::All => None,
        }
    }

    pub fn pagination(&self, total: u64) -> Pagination {
        match self.size {
            PageSize::All => Pagination::default(),
            PageSize::Limited(limit) => Pagination {
                prev: (self.skip() > 0).then(|| self.page - 1),
                next: (self.page.saturating_mul(limit) < total).then(|| self.page + 1),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_page_of_ten() {
        let request = PageRequest::from_params(None, None);
        assert_eq!(request, PageRequest::default());
        assert_eq!(request.skip(), 0);
        assert_eq!(request.limit(), Some(10));
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let request = PageRequest::from_params(Some("abc"), Some("-3"));
        assert_eq!(request.page, 1);
        assert_eq!(request.size, PageSize::Limited(10));

        let zero = PageRequest::from_params(Some("0"), Some("0"));
        assert_eq!(zero, PageRequest::default());
    }

    #[test]
    fn first_page_of_twenty_five() {
        let request = PageRequest::from_params(Some("1"), Some("10"));
        assert_eq!(
            request.pagination(25),
            Pagination {
                prev: None,
                next: Some(2)
            }
        );
    }

    #[test]
    fn middle_page_has_both_markers() {
        let request = PageRequest::from_params(Some("2"), Some("10"));
        assert_eq!(request.skip(), 10);
        assert_eq!(
            request.pagination(25),
            Pagination {
                prev: Some(1),
                next: Some(3)
            }
        );
    }

    #[test]
    fn last_page_has_no_next() {
        let request = PageRequest::from_params(Some("3"), Some("10"));
        assert_eq!(request.skip(), 20);
        assert_eq!(
            request.pagination(25),
            Pagination {
                prev: Some(2),
                next: None
            }
        );
    }

    #[test]
    fn exact_multiple_has_no_next() {
        let request = PageRequest::from_params(Some("2"), Some("10"));
        assert_eq!(request.pagination(20).next, None);
    }

    #[test]
    fn limit_all_is_unbounded() {
        let request = PageRequest::from_params(Some("4"), Some("all"));
        assert_eq!(request.skip(), 0);
        assert_eq!(request.limit(), None);
        assert_eq!(request.pagination(1_000), Pagination::default());
    }

    #[test]
    fn huge_windows_clamp_to_bigint() {
        let far = PageRequest::from_params(Some("1000000000000000000"), Some("10"));
        assert_eq!(far.skip(), 9_999_999_999_999_999_990);
        assert_eq!(sql_bound(far.skip()), i64::MAX);

        let wide = PageRequest::from_params(None, Some("18446744073709551615"));
        assert_eq!(wide.limit(), Some(u64::MAX));
        assert_eq!(sql_bound(u64::MAX), i64::MAX);

        let huge = PageRequest::from_params(Some("18446744073709551615"), Some("18446744073709551615"));
        assert_eq!(huge.skip(), u64::MAX);
        assert_eq!(sql_bound(huge.skip()), i64::MAX);
        assert_eq!(huge.pagination(25).next, None);

        assert_eq!(sql_bound(20), 20);
    }
}

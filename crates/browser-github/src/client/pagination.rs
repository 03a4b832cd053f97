//! Pagination support for GitHub API list endpoints.

/// Pagination metadata extracted from Link headers.
///
/// List endpoints are walked forward only, so other relations are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// URL for next page (if available)
    pub next: Option<String>,
}

impl Pagination {
    /// Check if there are more pages available.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Parse pagination metadata from Link header.
///
/// GitHub returns Link headers like:
/// `<https://api.github.com/resource?page=2>; rel="next", <https://api.github.com/resource?page=5>; rel="last"`
///
/// # Examples
///
/// ```rust
/// use browser_github::client::parse_link_header;
///
/// let header = r#"<https://api.github.com/app/installations?page=2>; rel="next""#;
/// let pagination = parse_link_header(Some(header));
///
/// assert!(pagination.has_next());
/// assert_eq!(pagination.next.as_deref(), Some("https://api.github.com/app/installations?page=2"));
/// ```
pub fn parse_link_header(link_header: Option<&str>) -> Pagination {
    let mut pagination = Pagination::default();

    let Some(header) = link_header else {
        return pagination;
    };

    for link in header.split(',') {
        let Some((url, rel)) = link.split_once(';') else {
            continue;
        };

        let url = url.trim().trim_start_matches('<').trim_end_matches('>');
        let rel = rel.trim().trim_start_matches("rel=\"").trim_end_matches('"');

        if rel == "next" {
            pagination.next = Some(url.to_string());
        }
    }

    pagination
}

#[cfg(test)]
#[path = "pagination_tests.rs"]
mod tests;

//! Cursor extraction from `Link` response headers.
//!
//! Listings advertise neighbouring pages with a single header of the form
//!
//! ```text
//! Link: <https://api.example.com/v2/builds?page=1>; rel="first", <https://api.example.com/v2/builds?page=3>; rel="next"
//! ```
//!
//! Parsing is best-effort: a malformed entry is skipped and never fails the call.

use http::header::LINK;
use http::HeaderMap;
use url::Url;

/// Base that relative link targets are resolved against. Only the `page` parameter is read.
const RELATIVE_BASE: &str = "http://link.invalid/";

/// Page numbers advertised by a response.
///
/// A cursor of `0` means the server did not advertise that page.
///
/// # Examples
///
/// ```
/// use hoist::Pagination;
///
/// let pages = Pagination::parse(r#"<https://api.example.com/v2/builds?page=2>; rel="next""#);
/// assert_eq!(pages.next_page, 2);
/// assert_eq!(pages.prev_page, 0);
/// assert!(pages.has_next());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    /// The first page of the listing.
    pub first_page: u32,
    /// The page before this one.
    pub prev_page: u32,
    /// The page after this one.
    pub next_page: u32,
    /// The last page of the listing.
    pub last_page: u32,
}

impl Pagination {
    /// Reads the cursors from every `Link` header in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut pages = Self::default();
        for value in headers.get_all(LINK) {
            match value.to_str() {
                Ok(value) => pages.merge(value),
                Err(_) => tracing::debug!("Skipping non-ASCII Link header"),
            }
        }
        pages
    }

    /// Parses a single `Link` header value.
    pub fn parse(value: &str) -> Self {
        let mut pages = Self::default();
        pages.merge(value);
        pages
    }

    /// Returns `true` if a following page was advertised.
    pub fn has_next(&self) -> bool {
        self.next_page != 0
    }

    fn merge(&mut self, value: &str) {
        for entry in value.split(',') {
            let Some((rel, page)) = parse_entry(entry) else {
                tracing::trace!(entry = entry.trim(), "Skipping malformed Link entry");
                continue;
            };
            match rel {
                "first" => self.first_page = page,
                "prev" => self.prev_page = page,
                "next" => self.next_page = page,
                "last" => self.last_page = page,
                _ => {}
            }
        }
    }
}

/// Splits `<url>; rel="name"` into the relation and the URL's `page` parameter.
fn parse_entry(entry: &str) -> Option<(&str, u32)> {
    let mut segments = entry.split(';');

    let target = segments.next()?.trim();
    let target = target.strip_prefix('<')?.strip_suffix('>')?;
    let url = Url::parse(RELATIVE_BASE).ok()?.join(target).ok()?;
    let page = url
        .query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse::<u32>().ok())?;

    let rel = segments.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim() != "rel" {
            return None;
        }
        Some(value.trim().trim_matches('"'))
    })?;

    Some((rel, page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    const FULL: &str = concat!(
        r#"<https://api.example.com/v2/builds?page=1&per_page=30>; rel="first", "#,
        r#"<https://api.example.com/v2/builds?page=3&per_page=30>; rel="prev", "#,
        r#"<https://api.example.com/v2/builds?page=5&per_page=30>; rel="next", "#,
        r#"<https://api.example.com/v2/builds?page=9&per_page=30>; rel="last""#,
    );

    #[test]
    fn test_all_relations() {
        let pages = Pagination::parse(FULL);
        assert_eq!(
            pages,
            Pagination {
                first_page: 1,
                prev_page: 3,
                next_page: 5,
                last_page: 9,
            }
        );
    }

    #[test]
    fn test_omitted_relations_stay_zero() {
        let pages = Pagination::parse(r#"<https://api.example.com/x?page=4>; rel="last""#);
        assert_eq!(pages.last_page, 4);
        assert_eq!(pages.first_page, 0);
        assert_eq!(pages.prev_page, 0);
        assert_eq!(pages.next_page, 0);
        assert!(!pages.has_next());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let header = concat!(
            r#"https://api.example.com/x?page=2; rel="first", "#,
            r#"<https://api.example.com/x?page=3>, "#,
            r#"<not a url>; rel="prev", "#,
            r#"<http://[::1/x?page=4>; rel="prev", "#,
            r#"<https://api.example.com/x?per_page=10>; rel="last", "#,
            r#"<https://api.example.com/x?page=abc>; rel="last", "#,
            r#"<https://api.example.com/x?page=7>; rel="next""#,
        );
        let pages = Pagination::parse(header);
        assert_eq!(
            pages,
            Pagination {
                next_page: 7,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_relative_targets() {
        let pages = Pagination::parse(
            r#"</v2/builds?page=2>; rel="next", </v2/builds?page=1>; rel="first", <builds?page=6>; rel="last""#,
        );
        assert_eq!(
            pages,
            Pagination {
                first_page: 1,
                prev_page: 0,
                next_page: 2,
                last_page: 6,
            }
        );
    }

    #[test]
    fn test_empty_and_garbage_headers() {
        assert_eq!(Pagination::parse(""), Pagination::default());
        assert_eq!(Pagination::parse(",,;;<>"), Pagination::default());
    }

    #[test]
    fn test_unquoted_rel_and_extra_params() {
        let pages =
            Pagination::parse(r#"<https://api.example.com/x?page=2>; title="n"; rel=next"#);
        assert_eq!(pages.next_page, 2);
    }

    #[test]
    fn test_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(r#"<https://api.example.com/x?page=1>; rel="prev""#),
        );
        let pages = Pagination::from_headers(&headers);
        assert_eq!(pages.prev_page, 1);
        assert_eq!(pages.next_page, 0);

        assert_eq!(Pagination::from_headers(&HeaderMap::new()), Pagination::default());
    }
}

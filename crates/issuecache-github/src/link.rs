//! RFC 8288 `Link` header parsing, as used by GitHub's REST pagination.
//!
//! ```text
//! Link: <https://api.github.com/repositories/1/issues?page=2>; rel="next",
//!       <https://api.github.com/repositories/1/issues?page=5>; rel="last"
//! ```

use url::Url;

/// One `<target>; rel="..."` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub target: String,
    pub rels: Vec<String>,
}

/// Parse every entry of a `Link` header value. Malformed entries are skipped.
pub fn parse_link_header(value: &str) -> Vec<LinkEntry> {
    let mut entries = Vec::new();
    let mut rest = value;

    while let Some(start) = rest.find('<') {
        let after_open = &rest[start + 1..];
        let Some(end) = after_open.find('>') else {
            break;
        };
        let target = after_open[..end].trim().to_string();
        let tail = &after_open[end + 1..];

        // Parameters run until the next entry opens.
        let params_end = tail.find('<').unwrap_or(tail.len());
        let params = &tail[..params_end];
        rest = &tail[params_end..];

        let rels = params
            .split(';')
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                if key.trim().eq_ignore_ascii_case("rel") {
                    Some(value.trim().trim_end_matches(',').trim().trim_matches('"').to_string())
                } else {
                    None
                }
            })
            .flat_map(|rel| {
                rel.split_whitespace()
                    .map(|r| r.to_ascii_lowercase())
                    .collect::<Vec<_>>()
            })
            .collect();

        entries.push(LinkEntry { target, rels });
    }

    entries
}

/// The `rel="next"` target, if present and a valid absolute URL.
pub fn next_link(value: &str) -> Option<Url> {
    parse_link_header(value)
        .into_iter()
        .find(|entry| entry.rels.iter().any(|r| r == "next"))
        .and_then(|entry| Url::parse(&entry.target).ok())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_github_style_header() {
        let header = r#"<https://api.github.com/repositories/1/issues?page=2>; rel="next", <https://api.github.com/repositories/1/issues?page=5>; rel="last""#;
        let entries = parse_link_header(header);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].rels, vec!["last"]);

        let next = next_link(header).unwrap();
        assert_eq!(next.query(), Some("page=2"));
    }

    #[test]
    fn test_next_not_first() {
        let header = r#"<https://h/x?page=1>; rel="prev", <https://h/x?page=3>; rel="next""#;
        assert_eq!(next_link(header).unwrap().as_str(), "https://h/x?page=3");
    }

    #[test]
    fn test_last_page_has_no_next() {
        let header = r#"<https://h/x?page=1>; rel="first", <https://h/x?page=2>; rel="prev""#;
        assert!(next_link(header).is_none());
    }

    #[test]
    fn test_multiple_rels_and_unquoted() {
        let header = r#"<https://h/x?page=2>; title="p2"; rel="next last""#;
        assert!(next_link(header).is_some());

        let header = "<https://h/x?page=2>; rel=next";
        assert!(next_link(header).is_some());
    }

    #[test]
    fn test_garbage() {
        assert!(parse_link_header("").is_empty());
        assert!(next_link("not a link header").is_none());
        assert!(next_link(r#"<relative/path>; rel="next""#).is_none());
    }
}

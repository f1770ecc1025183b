//! Link extraction. Turns `List-Unsubscribe` headers and message bodies
//! into candidate unsubscribe endpoints.
//!
//! Pure string parsing, no network access. URLs are kept as opaque strings;
//! validation happens when a candidate is executed.

use std::sync::LazyLock;

use regex::Regex;

use crate::unsubscribe::types::{UnsubscribeLinks, push_unique};

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<([^<>]*)>").unwrap());

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s<>"']+"#).unwrap());

/// Characters that end a sentence or a parenthetical rather than a URL.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']'];

/// Extract all unsubscribe candidates from a message.
///
/// `list_unsubscribe_post` is carried through untouched for the one-click
/// classifier.
pub fn extract_links(
    list_unsubscribe: Option<&str>,
    list_unsubscribe_post: Option<&str>,
    text_body: Option<&str>,
    html_body: Option<&str>,
) -> UnsubscribeLinks {
    let mut links = parse_list_unsubscribe(list_unsubscribe);
    links.guessed_links = guess_body_links(text_body, html_body);
    links.list_unsubscribe_post = list_unsubscribe_post
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    links
}

/// Parse a `List-Unsubscribe` header value into http and mailto candidates.
///
/// Bracketed tokens (`<...>`) win; senders that omit the brackets get a
/// plain comma split instead.
pub fn parse_list_unsubscribe(header: Option<&str>) -> UnsubscribeLinks {
    let mut links = UnsubscribeLinks::default();
    let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
        return links;
    };

    let bracketed: Vec<&str> = BRACKETED
        .captures_iter(header)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let candidates: Vec<&str> = if bracketed.is_empty() {
        header.split(',').collect()
    } else {
        bracketed
    };

    for candidate in candidates {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        let lower = candidate.to_ascii_lowercase();
        if lower.starts_with("mailto:") {
            push_unique(&mut links.mailto_links, candidate);
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            push_unique(&mut links.http_links, candidate);
        }
    }

    links
}

/// Scan body text for URLs that look like unsubscribe endpoints.
///
/// A URL qualifies when it contains `unsub` anywhere, case-insensitively.
/// Order of first appearance is kept; duplicates are dropped.
pub fn guess_body_links(text_body: Option<&str>, html_body: Option<&str>) -> Vec<String> {
    let mut haystack = String::new();
    if let Some(text) = text_body {
        haystack.push_str(text);
        haystack.push('\n');
    }
    if let Some(html) = html_body {
        haystack.push_str(&strip_html(html));
    }

    let mut guesses = Vec::new();
    for m in URL_PATTERN.find_iter(&haystack) {
        let url = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        if url.to_ascii_lowercase().contains("unsub") {
            push_unique(&mut guesses, url);
        }
    }
    guesses
}

/// Strip `<script>`/`<style>` blocks and all tags, leaving visible text.
pub fn strip_html(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(html, " ");
    let without_styles = STYLE_BLOCK.replace_all(&without_scripts, " ");
    let text = ANY_TAG.replace_all(&without_styles, " ");
    text.replace("&amp;", "&").replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Header parsing ──────────────────────────────────────────────

    #[test]
    fn bracketed_header_partitions_http_and_mailto() {
        let header = "<mailto:unsub@list.example?subject=remove>, <https://list.example/u/123>";
        let links = parse_list_unsubscribe(Some(header));
        assert_eq!(links.http_links, vec!["https://list.example/u/123"]);
        assert_eq!(
            links.mailto_links,
            vec!["mailto:unsub@list.example?subject=remove"]
        );
    }

    #[test]
    fn bracketed_header_dedupes_preserving_order() {
        let header = "<https://b.example/x>, <https://a.example/y>, <https://b.example/x>, <MAILTO:a@b.example>, <mailto:a@b.example>";
        let links = parse_list_unsubscribe(Some(header));
        assert_eq!(
            links.http_links,
            vec!["https://b.example/x", "https://a.example/y"]
        );
        // Case differs, so both are kept as distinct strings.
        assert_eq!(links.mailto_links.len(), 2);
    }

    #[test]
    fn unbracketed_header_parses_equivalently() {
        let bracketed = parse_list_unsubscribe(Some(
            "<https://list.example/u/1>, <mailto:leave@list.example>",
        ));
        let plain =
            parse_list_unsubscribe(Some("https://list.example/u/1, mailto:leave@list.example"));
        assert_eq!(bracketed, plain);
    }

    #[test]
    fn header_scheme_match_is_case_insensitive() {
        let links = parse_list_unsubscribe(Some("<HTTPS://list.example/U>"));
        assert_eq!(links.http_links, vec!["HTTPS://list.example/U"]);
    }

    #[test]
    fn header_ignores_unknown_schemes() {
        let links = parse_list_unsubscribe(Some("<ftp://list.example/u>, <javascript:alert(1)>"));
        assert!(links.is_empty());
    }

    #[test]
    fn empty_or_absent_header_yields_empty_lists() {
        assert!(parse_list_unsubscribe(None).is_empty());
        assert!(parse_list_unsubscribe(Some("")).is_empty());
        assert!(parse_list_unsubscribe(Some("   ")).is_empty());
    }

    #[test]
    fn malformed_http_candidates_are_kept_verbatim() {
        let links = parse_list_unsubscribe(Some("<http://exa mple.com/%%>"));
        assert_eq!(links.http_links, vec!["http://exa mple.com/%%"]);
    }

    // ── Body heuristics ─────────────────────────────────────────────

    #[test]
    fn guesses_only_urls_containing_unsub() {
        let text = "Read more at https://news.example/article/1\n\
                    To stop: https://news.example/Unsubscribe?id=9\n\
                    Or https://news.example/unsub-me";
        let guesses = guess_body_links(Some(text), None);
        assert_eq!(
            guesses,
            vec![
                "https://news.example/Unsubscribe?id=9",
                "https://news.example/unsub-me"
            ]
        );
    }

    #[test]
    fn guesses_exclude_script_and_style_blocks() {
        let html = r#"<html><head>
            <style>.x { background: url(https://cdn.example/unsub-bg.png) }</style>
            <script>var u = "https://track.example/unsubscribe-pixel";</script>
            </head><body><p>Leave: https://list.example/unsubscribe/42</p></body></html>"#;
        let guesses = guess_body_links(None, Some(html));
        assert_eq!(guesses, vec!["https://list.example/unsubscribe/42"]);
    }

    #[test]
    fn guesses_drop_urls_only_present_in_tag_attributes() {
        let html = r#"<a href="https://list.example/unsubscribe">Click here</a>"#;
        assert!(guess_body_links(None, Some(html)).is_empty());
    }

    #[test]
    fn guesses_dedupe_across_text_and_html() {
        let text = "Unsubscribe: https://list.example/unsub?u=1";
        let html = "<p>https://list.example/unsub?u=1</p><p>https://list.example/unsub?u=2</p>";
        let guesses = guess_body_links(Some(text), Some(html));
        assert_eq!(
            guesses,
            vec!["https://list.example/unsub?u=1", "https://list.example/unsub?u=2"]
        );
    }

    #[test]
    fn guesses_trim_sentence_punctuation_and_decode_amp() {
        let html = "<p>Visit https://list.example/unsub?a=1&amp;b=2.</p>";
        let guesses = guess_body_links(None, Some(html));
        assert_eq!(guesses, vec!["https://list.example/unsub?a=1&b=2"]);
    }

    #[test]
    fn guesses_trim_closing_brackets() {
        let text = "Opt out (see https://x.example/unsub). Or [https://x.example/unsubscribe]";
        let guesses = guess_body_links(Some(text), None);
        assert_eq!(
            guesses,
            vec!["https://x.example/unsub", "https://x.example/unsubscribe"]
        );
    }

    // ── Full extraction ─────────────────────────────────────────────

    #[test]
    fn extract_links_combines_header_body_and_post_header() {
        let links = extract_links(
            Some("<https://list.example/one-click>"),
            Some("  List-Unsubscribe=One-Click  "),
            Some("Manage at https://list.example/unsubscribe/page"),
            None,
        );
        assert_eq!(links.http_links, vec!["https://list.example/one-click"]);
        assert_eq!(
            links.guessed_links,
            vec!["https://list.example/unsubscribe/page"]
        );
        assert_eq!(
            links.list_unsubscribe_post.as_deref(),
            Some("List-Unsubscribe=One-Click")
        );
    }

    #[test]
    fn extract_links_with_nothing_is_empty() {
        let links = extract_links(None, None, None, None);
        assert!(links.is_empty());
        assert!(links.list_unsubscribe_post.is_none());
    }
}

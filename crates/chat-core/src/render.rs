//! Text rendering for chat messages: escaping, link markup, digests.
//!
//! All functions here are pure. The hub calls them while processing an
//! inbound message; nothing in this module touches shared state.

use std::sync::LazyLock;

use chrono::{DateTime, Local, Utc};
use regex::Regex;

/// Maximum number of characters kept in a notification digest.
pub const DIGEST_CHARS: usize = 64;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^ \n]+").expect("URL pattern is valid"));

/// Escape text for safe embedding in HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Short notification text for browsers.
///
/// Texts shorter than [`DIGEST_CHARS`] get a trailing bullet; longer ones are
/// cut at [`DIGEST_CHARS`] characters and end with an ellipsis.
pub fn notification_digest(text: &str) -> String {
    if text.chars().count() < DIGEST_CHARS {
        return format!("{text} •");
    }
    let cut: String = text.chars().take(DIGEST_CHARS).collect();
    format!("{cut}...")
}

/// Room shorthands: a lone `.`, `,` or `!` expands to a stock answer.
pub fn autoreplace(text: &str) -> &str {
    match text {
        "." => "да.",
        "," => "нет.",
        "!" => "ДА!!!",
        other => other,
    }
}

/// Message body announcing an uploaded file stored as `stored`.
pub fn upload_link(stored: &str, original: &str) -> String {
    format!(
        r#"file: <a target="chaturls" href="{}">{}</a>"#,
        escape_html(stored),
        escape_html(original),
    )
}

/// Wrap every `http(s)://` URL in an anchor opening in the shared link tab.
pub fn linkify(text: &str) -> String {
    URL_RE
        .replace_all(text, r#"<a target="chaturls" href="$0">$0</a>"#)
        .into_owned()
}

/// Message body markup: linkified, and preformatted when multi-line.
pub fn body_html(escaped_text: &str) -> String {
    let linked = linkify(escaped_text);
    if linked.contains('\n') {
        format!("<pre>{linked}</pre>")
    } else {
        linked
    }
}

/// Small-caps sender label: the first three characters, capitalized.
pub fn name_label(name: &str) -> String {
    let mut chars = name.chars().take(3);
    let mut label = String::with_capacity(3);
    if let Some(first) = chars.next() {
        label.extend(first.to_uppercase());
    }
    label.extend(chars);
    label
}

/// Markup delivered to browsers in real time and on replay.
pub fn live_html(name: &str, body: &str, ts: DateTime<Utc>) -> String {
    let local = ts.with_timezone(&Local);
    format!(
        "<p><span class=\"smallcaps\">{}</span>.\n{} <span class=\"ts\">({})</span></p>\n",
        escape_html(&name_label(name)),
        body,
        local.format("%H:%M"),
    )
}

/// Markup appended to the on-disk archive and the admin digest.
pub fn archive_html(name: &str, body: &str, ts: DateTime<Utc>) -> String {
    let local = ts.with_timezone(&Local);
    format!(
        "<p><span class=\"ts\">{}</span> {}: {}</p>\n",
        local.format("%Y-%m-%d %H:%M:%S"),
        escape_html(name),
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_html(r#"<b>"tom" & 'jerry'</b>"#),
            "&lt;b&gt;&#34;tom&#34; &amp; &#39;jerry&#39;&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn short_digest_gets_bullet() {
        assert_eq!(notification_digest("hello"), "hello •");
        assert_eq!(notification_digest(""), " •");
    }

    #[test]
    fn long_digest_is_cut_by_chars() {
        let text = "ж".repeat(100);
        let digest = notification_digest(&text);
        assert!(digest.ends_with("..."));
        assert_eq!(digest.chars().count(), DIGEST_CHARS + 3);
    }

    #[test]
    fn digest_at_exact_limit_is_cut() {
        let text = "a".repeat(DIGEST_CHARS);
        assert_eq!(notification_digest(&text), format!("{text}..."));
    }

    #[test]
    fn shorthands_expand() {
        assert_eq!(autoreplace("."), "да.");
        assert_eq!(autoreplace(","), "нет.");
        assert_eq!(autoreplace("!"), "ДА!!!");
        assert_eq!(autoreplace("ok."), "ok.");
    }

    #[test]
    fn upload_link_escapes_names() {
        assert_eq!(
            upload_link("20260101120000-a&b.txt", "a&b.txt"),
            r#"file: <a target="chaturls" href="20260101120000-a&amp;b.txt">a&amp;b.txt</a>"#
        );
    }

    #[test]
    fn linkify_wraps_urls() {
        let out = linkify("see https://example.com/x?y=1 now");
        assert_eq!(
            out,
            r#"see <a target="chaturls" href="https://example.com/x?y=1">https://example.com/x?y=1</a> now"#
        );
        assert_eq!(linkify("no links"), "no links");
    }

    #[test]
    fn multiline_body_is_preformatted() {
        assert_eq!(body_html("a\nb"), "<pre>a\nb</pre>");
        assert_eq!(body_html("a b"), "a b");
    }

    #[test]
    fn name_label_handles_short_and_unicode_names() {
        assert_eq!(name_label("alice"), "Ali");
        assert_eq!(name_label("bo"), "Bo");
        assert_eq!(name_label(""), "");
        assert_eq!(name_label("мила"), "Мил");
    }

    #[test]
    fn live_html_shape() {
        let html = live_html("alice", "hi", Utc::now());
        assert!(html.starts_with("<p><span class=\"smallcaps\">Ali</span>.\nhi <span class=\"ts\">("));
        assert!(html.ends_with(")</span></p>\n"));
    }

    #[test]
    fn archive_html_shape() {
        let html = archive_html("alice", "hi", Utc::now());
        assert!(html.starts_with("<p><span class=\"ts\">"));
        assert!(html.ends_with("</span> alice: hi</p>\n"));
    }
}

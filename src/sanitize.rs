//! Allow-list HTML sanitizer
//!
//! This is the security boundary for rendered messages: whatever HTML it is
//! given, only the tags and attributes the markdown renderer produces
//! survive. `href` must be an absolute http(s) URL, `style` may only carry a
//! `text-align`, and `class` is limited to plain tokens. Script-like
//! elements are removed together with their content; any other unknown tag
//! is dropped while its text is kept.

use crate::markdown::format_message;
use crate::types::CitationMap;
use crate::validation::is_valid_url;
use regex::Regex;
use std::sync::OnceLock;

/// Elements removed together with everything inside them
const STRIP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template", "textarea", "svg",
    "math", "frame", "frameset", "xmp", "title", "head",
];

const VOID_TAGS: &[&str] = &["br", "hr"];

fn allowed_attributes(tag: &str) -> Option<&'static [&'static str]> {
    let attrs: &'static [&'static str] = match tag {
        "a" => &[
            "href",
            "class",
            "title",
            "target",
            "rel",
            "data-citation",
            "data-citation-num",
        ],
        "sup" | "span" => &["class", "title"],
        "th" | "td" => &["style"],
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "hr" | "blockquote" | "ul" | "ol" | "table"
        | "pre" | "code" | "p" => &["class"],
        "strong" | "em" | "del" | "br" | "li" | "thead" | "tbody" | "tr" | "b" | "i" | "s" => &[],
        _ => return None,
    };
    Some(attrs)
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<(/?)([A-Za-z][A-Za-z0-9]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
            .expect("valid tag regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
            .expect("valid attribute regex")
    })
}

fn text_align_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*text-align\s*:\s*(left|right|center)\s*;?\s*$")
            .expect("valid style regex")
    })
}

fn class_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid class regex"))
}

/// Escape stray angle brackets in text between tags
fn escape_text(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn decode_basic_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Validate one attribute, returning the value to emit
fn clean_attribute(name: &str, value: &str) -> Option<String> {
    match name {
        "href" => {
            let decoded = decode_basic_entities(value);
            if decoded.chars().any(char::is_control) || !is_valid_url(Some(decoded.trim())) {
                return None;
            }
            Some(escape_attr(value.trim()))
        }
        "style" => text_align_re()
            .captures(value)
            .map(|caps| format!("text-align:{}", caps[1].to_ascii_lowercase())),
        "class" => {
            let tokens: Vec<&str> = value
                .split_whitespace()
                .filter(|t| class_token_re().is_match(t))
                .collect();
            (!tokens.is_empty()).then(|| tokens.join(" "))
        }
        "target" => (value == "_blank").then(|| value.to_string()),
        "rel" => {
            let tokens: Vec<&str> = value
                .split_whitespace()
                .filter(|t| matches!(*t, "noopener" | "noreferrer" | "nofollow"))
                .collect();
            (!tokens.is_empty()).then(|| tokens.join(" "))
        }
        _ => Some(escape_attr(value)),
    }
}

fn render_open_tag(tag: &str, raw_attrs: &str, allowed: &[&str]) -> String {
    let mut out = format!("<{}", tag);
    let mut has_blank_target = false;
    let mut has_rel = false;

    for caps in attr_re().captures_iter(raw_attrs) {
        let name = caps[1].to_ascii_lowercase();
        if !allowed.contains(&name.as_str()) {
            continue;
        }
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or("");
        if let Some(clean) = clean_attribute(&name, value) {
            has_blank_target |= name == "target";
            has_rel |= name == "rel";
            out.push_str(&format!(" {}=\"{}\"", name, clean));
        }
    }

    if tag == "a" && has_blank_target && !has_rel {
        out.push_str(" rel=\"noopener\"");
    }

    out.push('>');
    out
}

/// Remove everything outside the allow-list from an HTML fragment
///
/// # Examples
///
/// ```
/// use openchat::sanitize::sanitize_html;
///
/// let clean = sanitize_html(r#"<p onclick="x()">hi<script>alert(1)</script></p>"#);
/// assert_eq!(clean, "<p>hi</p>");
/// ```
pub fn sanitize_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    let mut skip_until: Option<String> = None;

    for caps in tag_re().captures_iter(html) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let closing = !caps[1].is_empty();
        let tag = caps[2].to_ascii_lowercase();

        if let Some(skipped) = &skip_until {
            if closing && tag == *skipped {
                skip_until = None;
            }
            cursor = whole.end();
            continue;
        }

        out.push_str(&escape_text(&html[cursor..whole.start()]));
        cursor = whole.end();

        if STRIP_WITH_CONTENT.contains(&tag.as_str()) {
            if !closing && !caps[3].trim_end().ends_with('/') {
                skip_until = Some(tag);
            }
            continue;
        }

        let Some(allowed) = allowed_attributes(&tag) else {
            continue;
        };

        if closing {
            if !VOID_TAGS.contains(&tag.as_str()) {
                out.push_str(&format!("</{}>", tag));
            }
        } else {
            out.push_str(&render_open_tag(&tag, &caps[3], allowed));
        }
    }

    if skip_until.is_none() {
        out.push_str(&escape_text(&html[cursor..]));
    }
    out
}

/// Render a chat message to display-safe HTML
///
/// Runs [`format_message`] and then [`sanitize_html`] on the result.
pub fn render_message(content: &str, citations: &CitationMap) -> String {
    sanitize_html(&format_message(content, citations))
}

//! Markdown-with-citations renderer
//!
//! Converts the constrained markdown dialect produced by chat models into
//! HTML. Rendering happens in fixed stages:
//!
//! 1. fenced code blocks and inline code are lifted out into placeholders
//! 2. the remaining text is HTML-escaped
//! 3. citation references (`[n]`, `^n^`, `[REF]n[/REF]`) become placeholders
//! 4. a line lexer groups the text into [`Block`]s (headers, rules, quotes,
//!    lists, pipe and tab tables, plain lines)
//! 5. each block is emitted as HTML, with inline links, bold, italic and
//!    strikethrough applied to its text
//! 6. placeholders are restored, code escaped independently of step 2
//!
//! Every piece of generated markup that carries attributes travels as a
//! placeholder until step 6, so no later pass can rewrite it.
//!
//! The output is escaped HTML but is not the security boundary on its own;
//! callers that display it should go through [`crate::sanitize::render_message`].

use crate::types::{Citation, CitationMap};
use crate::validation::is_valid_url;
use regex::{Captures, Regex};
use std::sync::OnceLock;

const PH: char = '\u{0}';

/// Escape text for use in HTML content or attribute values
///
/// Replaces `&`, `<`, `>`, `"` and `'` with entities.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_code(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn safe_href(url: &str) -> String {
    url.replace('"', "%22")
        .replace('<', "%3C")
        .replace('>', "%3E")
}

macro_rules! regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("valid markdown regex"))
        }
    };
}

regex!(code_block_re, r"(?s)```(\w*)\n?(.*?)```");
regex!(inline_code_re, r"`([^`\n]+)`");
regex!(ref_citation_re, r"\[REF\](\d+(?:\s*,\s*\d+)*)\[/REF\]");
regex!(caret_citation_re, r"\^(\d+(?:\s*,\s*\d+)*)\^");
regex!(bracket_citation_re, r"\[(\d+(?:\s*,\s*\d+)*)\]");
regex!(
    stray_target_rel_re,
    r"(?i)&quot;\s*target\s*=\s*&quot;[^&]*&quot;\s*rel\s*=\s*&quot;[^&]*&quot;\s*&gt;"
);
regex!(
    stray_rel_re,
    r"(?i)&quot;\s*rel\s*=\s*&quot;noopener noreferrer&quot;\s*(?:&gt;)?"
);
regex!(heading_re, r"^(#{1,6})\s+(.*)$");
regex!(rule_re, r"^(?:\*{3,}|-{3,}|_{3,})$");
regex!(quote_re, r"^&gt;\s?");
regex!(unordered_re, r"^\s*[-*+]\s+(.*)$");
regex!(ordered_re, r"^\s*\d+\.\s+(.*)$");
regex!(separator_re, r"^[\s|:-]+$");
regex!(code_line_re, r"^\x00CODEBLOCK\d+\x00$");
regex!(link_re, r"\[([^\]]+)\]\(([^)]+)\)");
regex!(bold_star_re, r"\*\*([^*]+)\*\*");
regex!(bold_underscore_re, r"__([^_]+)__");
regex!(italic_star_re, r"\*([^*\n]+)\*");
regex!(italic_underscore_re, r"_([^_\n]+)_");
regex!(strike_re, r"~~([^~]+)~~");
regex!(br_run_re, r"(?:<br>\s*){3,}");
regex!(placeholder_re, r"\x00(CODEBLOCK|INLINECODE|CITATION|LINK)(\d+)\x00");

/// Column alignment of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    /// `text-align:left`
    Left,
    /// `text-align:center`
    Center,
    /// `text-align:right`
    Right,
}

impl Align {
    fn as_str(&self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
        }
    }

    fn from_separator_cell(cell: &str) -> Self {
        if cell.starts_with(':') && cell.ends_with(':') {
            Align::Center
        } else if cell.ends_with(':') {
            Align::Right
        } else {
            Align::Left
        }
    }
}

/// A block-level token produced by the line lexer
///
/// Text inside blocks is already HTML-escaped and may contain placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// `# Title` through `###### Title`
    Heading { level: usize, text: String },
    /// `---`, `***` or `___`
    Rule,
    /// Consecutive `> ` lines, prefix removed
    Quote(Vec<String>),
    /// Consecutive list items of one kind
    List { ordered: bool, items: Vec<String> },
    /// Pipe- or tab-delimited table
    Table {
        headers: Vec<String>,
        aligns: Vec<Align>,
        rows: Vec<Vec<String>>,
    },
    /// A line holding only a fenced code block placeholder
    Code(String),
    /// Any other line, possibly empty
    Text(String),
}

impl Block {
    fn is_text(&self) -> bool {
        matches!(self, Block::Text(_))
    }
}

/// Markup lifted out of the text until the final restore pass
#[derive(Default)]
struct Placeholders {
    code_blocks: Vec<(String, String)>,
    inline_code: Vec<String>,
    citations: Vec<String>,
    links: Vec<String>,
}

impl Placeholders {
    fn push_citation(&mut self, html: String) -> String {
        self.citations.push(html);
        format!("{PH}CITATION{}{PH}", self.citations.len() - 1)
    }

    fn push_link(&mut self, html: String) -> String {
        self.links.push(html);
        format!("{PH}LINK{}{PH}", self.links.len() - 1)
    }

    fn restore(&self, text: &str) -> String {
        placeholder_re()
            .replace_all(text, |caps: &Captures| {
                let index: usize = caps[2].parse().unwrap_or(usize::MAX);
                match &caps[1] {
                    "CODEBLOCK" => self
                        .code_blocks
                        .get(index)
                        .map(|(lang, code)| {
                            let class = if lang.is_empty() {
                                String::new()
                            } else {
                                format!(" class=\"language-{}\"", lang)
                            };
                            format!(
                                "<pre class=\"md-codeblock\"><code{}>{}</code></pre>",
                                class,
                                escape_code(code)
                            )
                        })
                        .unwrap_or_default(),
                    "INLINECODE" => self
                        .inline_code
                        .get(index)
                        .map(|code| {
                            format!("<code class=\"md-inline-code\">{}</code>", escape_code(code))
                        })
                        .unwrap_or_default(),
                    "CITATION" => self.citations.get(index).cloned().unwrap_or_default(),
                    _ => self.links.get(index).cloned().unwrap_or_default(),
                }
            })
            .into_owned()
    }
}

/// Resolves citation references against a citation map
struct CitationResolver<'a> {
    citations: &'a CitationMap,
    ids: Vec<&'a str>,
}

impl<'a> CitationResolver<'a> {
    fn new(citations: &'a CitationMap) -> Self {
        // Integer keys in ascending numeric order, then any others.
        let mut ids: Vec<&str> = citations.keys().map(String::as_str).collect();
        ids.sort_by_key(|id| match id.parse::<u64>() {
            Ok(n) => (0, n, String::new()),
            Err(_) => (1, 0, id.to_string()),
        });
        Self { citations, ids }
    }

    fn render(&self, reference: u64, one_indexed: bool) -> String {
        let actual = if one_indexed {
            reference as i64 - 1
        } else {
            reference as i64
        };
        let display = actual + 1;

        let missing = || format!("<sup class=\"citation-link citation-missing\">[{}]</sup>", display);

        if actual < 0 || actual as usize >= self.ids.len() {
            return missing();
        }
        let id = self.ids[actual as usize];
        let Some(citation) = self.citations.get(id) else {
            return missing();
        };

        let href = citation_url(citation);
        let title = citation_title(citation).unwrap_or_else(|| format!("Source {}", display));

        match href.filter(|h| is_valid_url(Some(h))) {
            Some(href) => format!(
                "<a href=\"{}\" class=\"citation-link\" data-citation=\"{}\" data-citation-num=\"{}\" title=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\"><sup>[{}]</sup></a>",
                safe_href(&href),
                escape_html(id),
                display,
                escape_html(&title),
                display
            ),
            None => format!(
                "<sup class=\"citation-link citation-missing\" title=\"{}\">[{}]</sup>",
                escape_html(&title),
                display
            ),
        }
    }

    fn render_list(&self, numbers: &str, one_indexed: bool, placeholders: &mut Placeholders) -> String {
        numbers
            .split(',')
            .map(str::trim)
            .filter_map(|n| n.parse::<u64>().ok())
            .map(|n| {
                let html = self.render(n, one_indexed);
                placeholders.push_citation(html)
            })
            .collect()
    }
}

fn citation_url(citation: &Citation) -> Option<String> {
    citation
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| metadata_str(citation, "url"))
}

fn citation_title(citation: &Citation) -> Option<String> {
    citation
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| metadata_str(citation, "title"))
}

fn metadata_str(citation: &Citation, key: &str) -> Option<String> {
    citation
        .metadata
        .as_ref()
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Char immediately before byte offset `pos`
fn char_before(text: &str, pos: usize) -> Option<char> {
    text[..pos].chars().next_back()
}

/// Char starting at byte offset `pos`
fn char_at(text: &str, pos: usize) -> Option<char> {
    text[pos..].chars().next()
}

/// Replace matches of `re` that pass `accept`, retrying one character
/// further along after a rejected match.
fn replace_guarded<A, R>(text: &str, re: &Regex, accept: A, mut replace: R) -> String
where
    A: Fn(&str, usize, usize) -> bool,
    R: FnMut(&Captures) -> String,
{
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut search = 0;
    while search <= text.len() {
        let Some(caps) = re.captures_at(text, search) else {
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };
        if accept(text, whole.start(), whole.end()) {
            out.push_str(&text[copied..whole.start()]);
            out.push_str(&replace(&caps));
            copied = whole.end();
            search = whole.end();
        } else {
            search = whole.start()
                + char_at(text, whole.start()).map(char::len_utf8).unwrap_or(1);
        }
    }
    out.push_str(&text[copied..]);
    out
}

fn replace_citations(text: &str, resolver: &CitationResolver<'_>, placeholders: &mut Placeholders) -> String {
    let text = ref_citation_re()
        .replace_all(text, |caps: &Captures| {
            resolver.render_list(&caps[1], false, placeholders)
        })
        .into_owned();

    let text = caret_citation_re()
        .replace_all(&text, |caps: &Captures| {
            resolver.render_list(&caps[1], true, placeholders)
        })
        .into_owned();

    replace_guarded(
        &text,
        bracket_citation_re(),
        |t, start, end| {
            !matches!(char_before(t, start), Some('"') | Some('('))
                && char_at(t, end) != Some('(')
        },
        |caps| resolver.render_list(&caps[1], true, placeholders),
    )
}

/// Render a chat message as HTML
///
/// # Arguments
///
/// * `content` - Raw message text
/// * `citations` - Citation map for resolving `[n]`-style references
///
/// # Returns
///
/// Returns HTML in which all user-supplied text is escaped.
///
/// # Examples
///
/// ```
/// use openchat::markdown::format_message;
/// use openchat::types::CitationMap;
///
/// let html = format_message("**bold** and `code`", &CitationMap::new());
/// assert!(html.contains("<strong>bold</strong>"));
/// assert!(html.contains("<code class=\"md-inline-code\">code</code>"));
/// ```
pub fn format_message(content: &str, citations: &CitationMap) -> String {
    let content = content.replace(PH, "");
    let mut placeholders = Placeholders::default();

    let text = code_block_re()
        .replace_all(&content, |caps: &Captures| {
            placeholders
                .code_blocks
                .push((caps[1].to_string(), caps[2].trim().to_string()));
            format!("{PH}CODEBLOCK{}{PH}", placeholders.code_blocks.len() - 1)
        })
        .into_owned();

    let text = inline_code_re()
        .replace_all(&text, |caps: &Captures| {
            placeholders.inline_code.push(caps[1].to_string());
            format!("{PH}INLINECODE{}{PH}", placeholders.inline_code.len() - 1)
        })
        .into_owned();

    let text = escape_html(&text);

    // Providers sometimes leak anchor attributes into the reply text.
    let text = stray_target_rel_re().replace_all(&text, "").into_owned();
    let text = stray_rel_re().replace_all(&text, "").into_owned();

    let resolver = CitationResolver::new(citations);
    let text = replace_citations(&text, &resolver, &mut placeholders);

    let blocks = lex_blocks(&text);
    let html = emit_blocks(&blocks, &mut placeholders);
    let html = br_run_re().replace_all(&html, "<br><br>");

    placeholders.restore(&html)
}

fn is_tab_row(line: &str) -> Option<Vec<String>> {
    if !line.contains('\t') {
        return None;
    }
    let cells: Vec<String> = line
        .split('\t')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    (cells.len() >= 2).then_some(cells)
}

fn is_pipe_row(line: &str) -> bool {
    line.contains('|')
}

fn pipe_cells(line: &str) -> Vec<String> {
    let raw: Vec<&str> = line.split('|').collect();
    let inner: Vec<String> = if raw.len() > 2 {
        raw[1..raw.len() - 1]
            .iter()
            .map(|c| c.trim().to_string())
            .collect()
    } else {
        Vec::new()
    };
    if inner.is_empty() {
        raw.iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        inner
    }
}

fn is_separator(line: &str) -> bool {
    separator_re().is_match(line) && line.contains('-')
}

fn pad_row(mut cells: Vec<String>, width: usize) -> Vec<String> {
    while cells.len() < width {
        cells.push(String::new());
    }
    cells
}

fn list_item(line: &str) -> Option<(bool, String)> {
    if let Some(caps) = unordered_re().captures(line) {
        return Some((false, caps[1].to_string()));
    }
    ordered_re()
        .captures(line)
        .map(|caps| (true, caps[1].to_string()))
}

/// Group escaped lines into block tokens
pub fn lex_blocks(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(headers) = is_tab_row(line) {
            let width = headers.len();
            let mut rows = Vec::new();
            i += 1;
            while i < lines.len() {
                match is_tab_row(lines[i]) {
                    Some(cells) if !lines[i].trim().is_empty() => {
                        rows.push(pad_row(cells, width));
                        i += 1;
                    }
                    _ => break,
                }
            }
            blocks.push(Block::Table {
                aligns: vec![Align::Left; width],
                headers,
                rows,
            });
            continue;
        }

        if is_pipe_row(line) && lines.get(i + 1).is_some_and(|next| is_separator(next)) {
            let headers = pipe_cells(line);
            let aligns: Vec<Align> = lines[i + 1]
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(Align::from_separator_cell)
                .collect();
            let width = headers.len();
            let mut rows = Vec::new();
            i += 2;
            while i < lines.len() && is_pipe_row(lines[i]) && !lines[i].trim().is_empty() {
                rows.push(pad_row(pipe_cells(lines[i]), width));
                i += 1;
            }
            blocks.push(Block::Table {
                headers,
                aligns,
                rows,
            });
            continue;
        }

        if let Some(caps) = heading_re().captures(line) {
            blocks.push(Block::Heading {
                level: caps[1].len(),
                text: caps[2].to_string(),
            });
            i += 1;
            continue;
        }

        if rule_re().is_match(line.trim()) {
            blocks.push(Block::Rule);
            i += 1;
            continue;
        }

        if quote_re().is_match(line) {
            let mut quoted = Vec::new();
            while i < lines.len() && quote_re().is_match(lines[i]) {
                quoted.push(quote_re().replace(lines[i], "").into_owned());
                i += 1;
            }
            blocks.push(Block::Quote(quoted));
            continue;
        }

        if let Some((ordered, first)) = list_item(line) {
            let mut items = vec![first];
            i += 1;
            loop {
                let mut next = i;
                while next < lines.len() && lines[next].trim().is_empty() {
                    next += 1;
                }
                match lines.get(next).and_then(|l| list_item(l)) {
                    Some((kind, item)) if kind == ordered => {
                        items.push(item);
                        i = next + 1;
                    }
                    _ => break,
                }
            }
            blocks.push(Block::List { ordered, items });
            continue;
        }

        if code_line_re().is_match(line.trim()) {
            blocks.push(Block::Code(line.trim().to_string()));
            i += 1;
            continue;
        }

        blocks.push(Block::Text(line.to_string()));
        i += 1;
    }

    blocks
}

/// Apply inline markup: links, bold, italic and strikethrough
fn render_inline(text: &str, placeholders: &mut Placeholders) -> String {
    let text = link_re()
        .replace_all(text, |caps: &Captures| {
            let label = &caps[1];
            let href = caps[2].trim();
            let href = href.strip_prefix("&lt;").unwrap_or(href);
            let href = href.strip_suffix("&gt;").unwrap_or(href);
            // Escaped text carries `&amp;` where the author wrote `&`.
            let decoded = href.replace("&amp;", "&");
            if !is_valid_url(Some(&decoded)) {
                return label.to_string();
            }
            let open = placeholders.push_link(format!(
                "<a href=\"{}\" target=\"_blank\" rel=\"noopener\" class=\"md-link\">",
                safe_href(href)
            ));
            format!("{}{}</a>", open, label)
        })
        .into_owned();

    let text = bold_star_re()
        .replace_all(&text, "<strong>$1</strong>")
        .into_owned();
    let text = bold_underscore_re()
        .replace_all(&text, "<strong>$1</strong>")
        .into_owned();

    let text = replace_guarded(
        &text,
        italic_star_re(),
        |t, start, end| {
            !matches!(char_before(t, start), Some('\\') | Some('*')) && char_at(t, end) != Some('*')
        },
        |caps| format!("<em>{}</em>", &caps[1]),
    );

    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let text = replace_guarded(
        &text,
        italic_underscore_re(),
        |t, start, end| {
            let before = char_before(t, start);
            before != Some('\\') && !is_word(before) && !is_word(char_at(t, end))
        },
        |caps| format!("<em>{}</em>", &caps[1]),
    );

    strike_re()
        .replace_all(&text, "<del>$1</del>")
        .into_owned()
}

fn emit_block(block: &Block, placeholders: &mut Placeholders) -> String {
    match block {
        Block::Heading { level, text } => format!(
            "<h{level} class=\"md-header\">{}</h{level}>",
            render_inline(text, placeholders)
        ),
        Block::Rule => "<hr class=\"md-hr\">".to_string(),
        Block::Quote(lines) => {
            let body: Vec<String> = lines
                .iter()
                .map(|l| render_inline(l, placeholders))
                .collect();
            format!(
                "<blockquote class=\"md-blockquote\">{}</blockquote>",
                body.join("<br>\n")
            )
        }
        Block::List { ordered, items } => {
            let tag = if *ordered { "ol" } else { "ul" };
            let mut out = format!("<{tag} class=\"md-list\">\n");
            for item in items {
                out.push_str(&format!("<li>{}</li>\n", render_inline(item, placeholders)));
            }
            out.push_str(&format!("</{tag}>"));
            out
        }
        Block::Table {
            headers,
            aligns,
            rows,
        } => {
            let align_at = |idx: usize| aligns.get(idx).copied().unwrap_or(Align::Left).as_str();
            let mut out = String::from("<table class=\"md-table\">\n<thead><tr>");
            for (idx, header) in headers.iter().enumerate() {
                out.push_str(&format!(
                    "<th style=\"text-align:{}\">{}</th>",
                    align_at(idx),
                    render_inline(header, placeholders)
                ));
            }
            out.push_str("</tr></thead>\n<tbody>\n");
            for row in rows {
                out.push_str("<tr>");
                for (idx, cell) in row.iter().enumerate() {
                    out.push_str(&format!(
                        "<td style=\"text-align:{}\">{}</td>",
                        align_at(idx),
                        render_inline(cell, placeholders)
                    ));
                }
                out.push_str("</tr>\n");
            }
            out.push_str("</tbody></table>");
            out
        }
        Block::Code(placeholder) => placeholder.clone(),
        Block::Text(text) => render_inline(text, placeholders),
    }
}

/// Emit HTML for a block sequence
///
/// Adjacent text lines are joined with `<br>`; anything next to a block
/// element is joined with a bare newline.
fn emit_blocks(blocks: &[Block], placeholders: &mut Placeholders) -> String {
    let mut out = String::new();
    for (idx, block) in blocks.iter().enumerate() {
        if idx > 0 {
            if blocks[idx - 1].is_text() && block.is_text() {
                out.push_str("<br>\n");
            } else {
                out.push('\n');
            }
        }
        out.push_str(&emit_block(block, placeholders));
    }
    out
}

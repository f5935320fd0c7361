//! Anchor scanning for node content.
//!
//! Node content is an opaque HTML string. Observers only need to find links in
//! it, so this is a scanner for `<a ...>text</a>` rather than a full parser.

/// A link found in node content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: Option<String>,
    /// Visible text with nested tags stripped and whitespace collapsed.
    pub text: String,
}

/// Collapse runs of whitespace and trim, like XPath `normalize-space`.
pub fn normalize_space(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text a reader would see in `html`: tags dropped, whitespace collapsed.
pub fn visible_text(html: &str) -> String {
    normalize_space(&strip_tags(html))
}

/// Every anchor in `html`, in document order.
pub fn parse_anchors(html: &str) -> Vec<Anchor> {
    let lower = html.to_ascii_lowercase();
    let mut anchors = Vec::new();
    let mut cursor = 0;

    while let Some(found) = find_anchor_start(&lower, cursor) {
        let Some(tag_end) = find_tag_end(html, found) else {
            break;
        };
        let attributes = &html[found + 2..tag_end];
        let body_start = tag_end + 1;
        let body_end = lower[body_start..]
            .find("</a")
            .map(|offset| body_start + offset)
            .unwrap_or(html.len());

        anchors.push(Anchor {
            href: attribute(attributes, "href"),
            text: visible_text(&html[body_start..body_end]),
        });
        cursor = body_end;
    }

    anchors
}

/// Position of the next `<a` that starts an anchor tag (not `<abbr>` etc.).
fn find_anchor_start(lower: &str, from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(offset) = lower[search..].find("<a") {
        let start = search + offset;
        match lower[start + 2..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => return Some(start),
            _ => search = start + 2,
        }
    }
    None
}

/// Index of the `>` closing the tag that starts at `start`, skipping quoted values.
fn find_tag_end(html: &str, start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, c) in html[start..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(start + offset),
            (None, _) => {}
        }
    }
    None
}

fn attribute(attributes: &str, name: &str) -> Option<String> {
    let lower = attributes.to_ascii_lowercase();
    let mut search = 0;
    while let Some(offset) = lower[search..].find(name) {
        let start = search + offset;
        search = start + name.len();

        let preceded_ok = lower[..start]
            .chars()
            .next_back()
            .is_none_or(|c| c.is_whitespace());
        let rest = attributes[search..].trim_start();
        if !preceded_ok || !rest.starts_with('=') {
            continue;
        }
        let value = rest[1..].trim_start();
        return match value.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let inner = &value[1..];
                Some(inner[..inner.find(q).unwrap_or(inner.len())].to_string())
            }
            Some(_) => Some(
                value
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            ),
            None => Some(String::new()),
        };
    }
    None
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

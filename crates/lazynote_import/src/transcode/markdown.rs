//! Line-oriented Markdown to canonical HTML.
//!
//! Covers the block and inline subset note exports actually use: ATX
//! headings, lists with task items, fenced and indented code, block quotes,
//! rules and paragraphs; code spans, strong, emphasis, strikethrough,
//! images, links, autolinks and wiki links. Front matter is skipped, its
//! `title` kept.

use crate::transcode::links::{
    render_image, render_link, render_wiki, scan_wiki, ResolvedTarget, TargetResolver,
};
use crate::transcode::markup::{escape_attr, escape_text, plain_text};
use once_cell::sync::Lazy;
use regex::Regex;

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]+(.*))?$").expect("valid heading regex"));
static RULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ {0,3}(?:(?:-[ \t]*){3,}|(?:\*[ \t]*){3,}|(?:_[ \t]*){3,})$")
        .expect("valid rule regex")
});
static LIST_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([ \t]*)([-*+]|\d{1,9}[.)])[ \t]+(.*)$").expect("valid list item regex")
});
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})[ \t]*([^`\s]*)").expect("valid fence regex"));
static TASK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([ xX])\][ \t]+(.*)$").expect("valid task regex"));

const INDENTED_CODE_LANGUAGE: &str = "plain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownDocument {
    /// Front matter `title`, else the first level-one heading.
    pub title: Option<String>,
    pub html: String,
}

pub fn render_markdown(source: &str, resolver: &mut dyn TargetResolver) -> MarkdownDocument {
    let (front_title, body) = split_front_matter(source);
    let lines = body.lines().map(str::to_string).collect::<Vec<_>>();
    let mut renderer = Renderer {
        resolver,
        first_heading: None,
    };
    let html = renderer.blocks(&lines);
    MarkdownDocument {
        title: front_title.or(renderer.first_heading),
        html,
    }
}

struct ListItem {
    indent: usize,
    ordered: bool,
    text: String,
}

struct Renderer<'r> {
    resolver: &'r mut dyn TargetResolver,
    first_heading: Option<String>,
}

impl Renderer<'_> {
    fn blocks(&mut self, lines: &[String]) -> String {
        let mut out = String::new();
        let mut paragraph: Vec<&str> = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i].as_str();
            if line.trim().is_empty() {
                self.flush_paragraph(&mut paragraph, &mut out);
                i += 1;
                continue;
            }

            if let Some(caps) = FENCE_RE.captures(line) {
                self.flush_paragraph(&mut paragraph, &mut out);
                let fence = caps[1].to_string();
                let language = caps[2].to_string();
                let mut code = Vec::new();
                i += 1;
                while i < lines.len() && !closes_fence(&lines[i], &fence) {
                    code.push(lines[i].as_str());
                    i += 1;
                }
                i += 1;
                out.push_str(&code_block(&language, &code.join("\n")));
                continue;
            }

            if paragraph.is_empty() && indent_width(line) >= 4 {
                let mut code = Vec::new();
                while i < lines.len() {
                    let current = lines[i].as_str();
                    if indent_width(current) >= 4 {
                        code.push(strip_indent(current, 4));
                    } else if current.trim().is_empty()
                        && lines.get(i + 1).map(|next| indent_width(next) >= 4).unwrap_or(false)
                    {
                        code.push("");
                    } else {
                        break;
                    }
                    i += 1;
                }
                out.push_str(&code_block(INDENTED_CODE_LANGUAGE, &code.join("\n")));
                continue;
            }

            if let Some(caps) = HEADING_RE.captures(line) {
                self.flush_paragraph(&mut paragraph, &mut out);
                let level = caps[1].len();
                let text = strip_closing_hashes(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
                let inner = self.inline(text);
                if level == 1 && self.first_heading.is_none() {
                    let title = plain_text(&inner);
                    if !title.is_empty() {
                        self.first_heading = Some(title);
                    }
                }
                out.push_str(&format!("<h{level}>{inner}</h{level}>"));
                i += 1;
                continue;
            }

            if RULE_RE.is_match(line) {
                self.flush_paragraph(&mut paragraph, &mut out);
                out.push_str("<hr/>");
                i += 1;
                continue;
            }

            if line.trim_start().starts_with('>') {
                self.flush_paragraph(&mut paragraph, &mut out);
                let mut quoted = Vec::new();
                while i < lines.len() && lines[i].trim_start().starts_with('>') {
                    let stripped = lines[i].trim_start()[1..].to_string();
                    quoted.push(stripped.strip_prefix(' ').map(str::to_string).unwrap_or(stripped));
                    i += 1;
                }
                let inner = self.blocks(&quoted);
                out.push_str(&format!("<blockquote>{inner}</blockquote>"));
                continue;
            }

            if LIST_ITEM_RE.is_match(line) {
                self.flush_paragraph(&mut paragraph, &mut out);
                let mut items: Vec<ListItem> = Vec::new();
                while i < lines.len() {
                    let current = lines[i].as_str();
                    if let Some(caps) = LIST_ITEM_RE.captures(current) {
                        items.push(ListItem {
                            indent: indent_width(&caps[1]),
                            ordered: caps[2].ends_with(|ch: char| ch == '.' || ch == ')'),
                            text: caps[3].trim().to_string(),
                        });
                    } else if current.trim().is_empty() {
                        let continues = lines
                            .get(i + 1)
                            .map(|next| LIST_ITEM_RE.is_match(next) || indent_width(next) >= 2)
                            .unwrap_or(false);
                        if !continues {
                            break;
                        }
                    } else if indent_width(current) >= 2 {
                        if let Some(last) = items.last_mut() {
                            last.text.push(' ');
                            last.text.push_str(current.trim());
                        }
                    } else {
                        break;
                    }
                    i += 1;
                }
                out.push_str(&self.list(&items));
                continue;
            }

            paragraph.push(line);
            i += 1;
        }
        self.flush_paragraph(&mut paragraph, &mut out);
        out
    }

    fn flush_paragraph(&mut self, paragraph: &mut Vec<&str>, out: &mut String) {
        if paragraph.is_empty() {
            return;
        }
        let mut html = String::new();
        let last = paragraph.len() - 1;
        for (index, line) in paragraph.iter().enumerate() {
            let hard_break = line.ends_with("  ") || line.ends_with('\\');
            let text = line.trim().trim_end_matches('\\');
            html.push_str(&self.inline(text));
            if index < last {
                html.push_str(if hard_break { "<br/>" } else { " " });
            }
        }
        paragraph.clear();
        out.push_str(&format!("<p>{html}</p>"));
    }

    fn list(&mut self, items: &[ListItem]) -> String {
        let mut out = String::new();
        let mut stack: Vec<(usize, bool)> = Vec::new();
        for item in items {
            while let Some(&(indent, ordered)) = stack.last() {
                if item.indent >= indent {
                    break;
                }
                out.push_str("</li>");
                out.push_str(list_close(ordered));
                stack.pop();
            }
            match stack.last().copied() {
                Some((indent, ordered)) if indent == item.indent => {
                    out.push_str("</li>");
                    if ordered != item.ordered {
                        out.push_str(list_close(ordered));
                        out.push_str(list_open(item.ordered));
                        stack.pop();
                        stack.push((item.indent, item.ordered));
                    }
                }
                _ => {
                    out.push_str(list_open(item.ordered));
                    stack.push((item.indent, item.ordered));
                }
            }
            out.push_str("<li>");
            match TASK_RE.captures(&item.text) {
                Some(caps) => {
                    if caps[1].eq_ignore_ascii_case("x") {
                        out.push_str("<input type=\"checkbox\" disabled checked/>");
                    } else {
                        out.push_str("<input type=\"checkbox\" disabled/>");
                    }
                    out.push(' ');
                    out.push_str(&self.inline(&caps[2]));
                }
                None => out.push_str(&self.inline(&item.text)),
            }
        }
        while let Some((_, ordered)) = stack.pop() {
            out.push_str("</li>");
            out.push_str(list_close(ordered));
        }
        out
    }

    fn inline(&mut self, text: &str) -> String {
        let bytes = text.as_bytes();
        let mut out = String::new();
        let mut plain_start = 0;
        let mut i = 0;

        while i < bytes.len() {
            let rest = &text[i..];
            let previous = text[..i].chars().next_back();
            let handled = match bytes[i] {
                b'\\' => rest[1..]
                    .chars()
                    .next()
                    .filter(char::is_ascii_punctuation)
                    .map(|ch| (escape_text(&ch.to_string()), 2)),
                b'`' => code_span(rest),
                b'!' | b'[' if scan_wiki(rest).is_some() => scan_wiki(rest)
                    .map(|(len, inner, embed)| (render_wiki(inner, embed, &mut *self.resolver), len)),
                b'!' if rest.starts_with("![") => self.image(rest),
                b'[' => self.link(rest),
                b'*' | b'_' => self.emphasis(rest, previous),
                b'~' if rest.starts_with("~~") => self.delimited(rest, "~~", "del"),
                b'<' => self.autolink(rest),
                _ => None,
            };

            match handled {
                Some((html, consumed)) => {
                    out.push_str(&escape_text(&text[plain_start..i]));
                    out.push_str(&html);
                    i += consumed;
                    plain_start = i;
                }
                None => i += rest.chars().next().map(char::len_utf8).unwrap_or(1),
            }
        }
        out.push_str(&escape_text(&text[plain_start..]));
        out
    }

    fn image(&mut self, rest: &str) -> Option<(String, usize)> {
        let (alt, destination, consumed) = bracket_and_destination(&rest[1..])?;
        let target = self.resolver.resolve_image(&destination);
        Some((render_image(&target, &destination, alt), consumed + 1))
    }

    fn link(&mut self, rest: &str) -> Option<(String, usize)> {
        let (label, destination, consumed) = bracket_and_destination(rest)?;
        let inner = self.inline(label);
        let target = self.resolver.resolve_link(&destination);
        Some((render_link(&target, &inner), consumed))
    }

    fn emphasis(&mut self, rest: &str, previous: Option<char>) -> Option<(String, usize)> {
        let marker = &rest[..1];
        if marker == "_" && previous.map(char::is_alphanumeric).unwrap_or(false) {
            return None;
        }
        let double = marker.repeat(2);
        if rest.starts_with(&double) {
            return self.delimited(rest, &double, "strong");
        }
        self.delimited(rest, marker, "em")
    }

    fn delimited(&mut self, rest: &str, delimiter: &str, tag: &str) -> Option<(String, usize)> {
        let body = &rest[delimiter.len()..];
        let close = body.find(delimiter)?;
        let inner = &body[..close];
        if inner.is_empty() || inner.starts_with(char::is_whitespace) || inner.ends_with(char::is_whitespace) {
            return None;
        }
        let html = format!("<{tag}>{}</{tag}>", self.inline(inner));
        Some((html, delimiter.len() * 2 + close))
    }

    fn autolink(&mut self, rest: &str) -> Option<(String, usize)> {
        let close = rest.find('>')?;
        let url = &rest[1..close];
        let lower = url.to_ascii_lowercase();
        let is_url = lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.starts_with("mailto:");
        if !is_url || url.contains(char::is_whitespace) {
            return None;
        }
        let target = ResolvedTarget::External(url.to_string());
        Some((render_link(&target, &escape_text(url)), close + 1))
    }
}

/// Parses `[label](destination "title")` at the start of `text`.
fn bracket_and_destination(text: &str) -> Option<(&str, String, usize)> {
    if !text.starts_with('[') {
        return None;
    }
    let label_end = matching(text, 0, b'[', b']')?;
    if text.as_bytes().get(label_end + 1) != Some(&b'(') {
        return None;
    }
    let dest_start = label_end + 1;
    let dest_end = matching(text, dest_start, b'(', b')')?;
    let raw = text[dest_start + 1..dest_end].trim();
    let destination = match raw.strip_prefix('<') {
        Some(inner) => inner.split('>').next().unwrap_or("").to_string(),
        None => raw.split_whitespace().next().unwrap_or("").to_string(),
    };
    Some((&text[1..label_end], destination, dest_end + 1))
}

/// Index of the delimiter closing the one at `open`, honoring nesting.
fn matching(text: &str, open: usize, open_byte: u8, close_byte: u8) -> Option<usize> {
    let mut depth = 0usize;
    let bytes = text.as_bytes();
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b if b == open_byte => depth += 1,
            b if b == close_byte => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn code_span(rest: &str) -> Option<(String, usize)> {
    let ticks = rest.bytes().take_while(|b| *b == b'`').count();
    let fence = "`".repeat(ticks);
    let close = rest[ticks..].find(&fence)?;
    let code = rest[ticks..ticks + close].trim();
    Some((
        format!("<code>{}</code>", escape_text(code)),
        ticks * 2 + close,
    ))
}

fn code_block(language: &str, code: &str) -> String {
    let language = if language.is_empty() {
        INDENTED_CODE_LANGUAGE
    } else {
        language
    };
    format!(
        "<pre data-language=\"{}\"><code>{}</code></pre>",
        escape_attr(language),
        escape_text(code)
    )
}

fn closes_fence(line: &str, fence: &str) -> bool {
    let trimmed = line.trim();
    let marker = fence.as_bytes()[0];
    trimmed.len() >= fence.len() && trimmed.bytes().all(|b| b == marker)
}

fn strip_closing_hashes(text: &str) -> &str {
    let trimmed = text.trim_end();
    let without = trimmed.trim_end_matches('#');
    if without.len() == trimmed.len() {
        return trimmed;
    }
    if without.is_empty() || without.ends_with(|ch: char| ch == ' ' || ch == '\t') {
        without.trim_end()
    } else {
        trimmed
    }
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|ch| ch.is_whitespace())
        .map(|ch| if ch == '\t' { 4 } else { 1 })
        .sum()
}

fn strip_indent(line: &str, width: usize) -> &str {
    let mut consumed = 0;
    for (offset, ch) in line.char_indices() {
        if consumed >= width || !matches!(ch, ' ' | '\t') {
            return &line[offset..];
        }
        consumed += if ch == '\t' { 4 } else { 1 };
    }
    ""
}

fn list_open(ordered: bool) -> &'static str {
    if ordered {
        "<ol>"
    } else {
        "<ul>"
    }
}

fn list_close(ordered: bool) -> &'static str {
    if ordered {
        "</ol>"
    } else {
        "</ul>"
    }
}

fn split_front_matter(source: &str) -> (Option<String>, &str) {
    let Some(rest) = source
        .strip_prefix("---\n")
        .or_else(|| source.strip_prefix("---\r\n"))
    else {
        return (None, source);
    };

    let mut offset = 0;
    let mut title = None;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim();
        if trimmed == "---" || trimmed == "..." {
            return (title, &rest[offset..]);
        }
        if let Some(value) = trimmed.strip_prefix("title:") {
            let value = value.trim().trim_matches(|ch: char| ch == '"' || ch == '\'');
            if !value.is_empty() {
                title = Some(value.to_string());
            }
        }
    }
    (None, source)
}

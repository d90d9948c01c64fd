//! Minimal tag tokenizer shared by the legacy pipeline and the HTML walk.
//!
//! # Invariants
//! - Tokens carry byte spans into the input; concatenating every span in
//!   order reproduces the input exactly.
//! - Contents of `script` and `style` are emitted as one raw text token.
//! - Tag names are lowercased; attribute values are entity-decoded.

use std::borrow::Cow;

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Open {
        name: String,
        attrs: Vec<Attribute>,
        self_closing: bool,
    },
    Close {
        name: String,
    },
    Text,
    /// Comments, doctypes and processing instructions.
    Markup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn raw<'a>(&self, input: &'a str) -> &'a str {
        &input[self.start..self.end]
    }

    pub fn is_open(&self, tag: &str) -> bool {
        matches!(&self.kind, TokenKind::Open { name, .. } if name == tag)
    }

    pub fn is_close(&self, tag: &str) -> bool {
        matches!(&self.kind, TokenKind::Close { name } if name == tag)
    }

    pub fn attr(&self, attr_name: &str) -> Option<&Attribute> {
        match &self.kind {
            TokenKind::Open { attrs, .. } => attrs.iter().find(|attr| attr.name == attr_name),
            _ => None,
        }
    }
}

/// Streaming tokenizer over an HTML-like string.
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    raw_text_until: Option<String>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::at(input, 0)
    }

    /// Starts tokenizing at byte offset `pos`, which must sit on a char
    /// boundary.
    pub fn at(input: &'a str, pos: usize) -> Self {
        Self {
            input,
            pos: pos.min(input.len()),
            raw_text_until: None,
        }
    }

    fn raw_text(&mut self, tag: String) -> Token {
        let start = self.pos;
        let needle = format!("</{tag}");
        let rest = &self.input[start..];
        let end = find_ascii_case_insensitive(rest, &needle)
            .map(|offset| start + offset)
            .unwrap_or(self.input.len());
        self.pos = end;
        Token {
            kind: TokenKind::Text,
            start,
            end,
        }
    }

    fn text(&mut self) -> Token {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end] != b'<' {
            end += 1;
        }
        self.pos = end;
        Token {
            kind: TokenKind::Text,
            start,
            end,
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.pos >= self.input.len() {
            return None;
        }
        if let Some(tag) = self.raw_text_until.take() {
            let token = self.raw_text(tag);
            if token.start < token.end {
                return Some(token);
            }
            if self.pos >= self.input.len() {
                return None;
            }
        }

        let start = self.pos;
        if self.input.as_bytes()[start] != b'<' {
            return Some(self.text());
        }
        match parse_tag(self.input, start) {
            Some((kind, end)) => {
                if let TokenKind::Open {
                    name,
                    self_closing: false,
                    ..
                } = &kind
                {
                    if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                        self.raw_text_until = Some(name.clone());
                    }
                }
                self.pos = end;
                Some(Token { kind, start, end })
            }
            None => Some(self.text()),
        }
    }
}

pub fn tokenize(input: &str) -> Vec<Token> {
    Tokenizer::new(input).collect()
}

pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

/// Finds the close tag matching an already-consumed open tag of `name`.
///
/// Scanning starts at `from` (just past the open tag) with depth one.
/// Returns the span of the matching close tag, or `None` when unbalanced.
pub fn find_balanced_close(input: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    for token in Tokenizer::at(input, from) {
        match &token.kind {
            TokenKind::Open {
                name: open,
                self_closing: false,
                ..
            } if open == name => depth += 1,
            TokenKind::Close { name: close } if close == name => {
                depth -= 1;
                if depth == 0 {
                    return Some((token.start, token.end));
                }
            }
            _ => {}
        }
    }
    None
}

/// Visible text of a markup fragment, with block boundaries as spaces.
pub fn plain_text(input: &str) -> String {
    let mut out = String::new();
    let mut skip_depth = 0usize;
    for token in Tokenizer::new(input) {
        match &token.kind {
            TokenKind::Open {
                name, self_closing, ..
            } => {
                if RAW_TEXT_ELEMENTS.contains(&name.as_str()) && !self_closing {
                    skip_depth += 1;
                } else if is_block_boundary(name) {
                    out.push(' ');
                }
            }
            TokenKind::Close { name } => {
                if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if is_block_boundary(name) {
                    out.push(' ');
                }
            }
            TokenKind::Text if skip_depth == 0 => {
                out.push_str(&decode_entities(token.raw(input)));
            }
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_block_boundary(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "br"
            | "li"
            | "ul"
            | "ol"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "blockquote"
            | "pre"
            | "tr"
            | "td"
            | "th"
            | "hr"
            | "table"
    )
}

/// Decodes the named entities the pipeline emits plus numeric references.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .filter(|semi| *semi <= 10)
            .and_then(|semi| decode_entity(&tail[1..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let number = entity.strip_prefix('#')?;
            let hex = number
                .strip_prefix('x')
                .or_else(|| number.strip_prefix('X'));
            let code = match hex {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

/// Serializes an open tag with the given attributes.
pub fn render_open(name: &str, attrs: &[Attribute]) -> String {
    let mut out = format!("<{name}");
    for attr in attrs {
        out.push(' ');
        out.push_str(&attr.name);
        if let Some(value) = &attr.value {
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
    }
    if is_void_element(name) {
        out.push('/');
    }
    out.push('>');
    out
}

/// Parses the attribute section of a tag (everything after the name).
pub fn parse_attributes(section: &str) -> Vec<Attribute> {
    let bytes = section.as_bytes();
    let mut attrs = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'/' | b'>')
        {
            i += 1;
        }
        if name_start == i {
            i += 1;
            continue;
        }
        let name = section[name_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            attrs.push(Attribute { name, value: None });
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let value = if i < bytes.len() && matches!(bytes[i], b'"' | b'\'') {
            let quote = bytes[i];
            let value_start = i + 1;
            let value_end = section[value_start..]
                .bytes()
                .position(|b| b == quote)
                .map(|offset| value_start + offset)
                .unwrap_or(bytes.len());
            i = (value_end + 1).min(bytes.len());
            &section[value_start..value_end]
        } else {
            let value_start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                i += 1;
            }
            &section[value_start..i]
        };
        attrs.push(Attribute {
            name,
            value: Some(decode_entities(value).into_owned()),
        });
    }
    attrs
}

fn parse_tag(input: &str, start: usize) -> Option<(TokenKind, usize)> {
    let rest = &input[start..];
    let bytes = rest.as_bytes();
    let second = *bytes.get(1)?;

    if rest.starts_with("<!--") {
        let end = rest[4..]
            .find("-->")
            .map(|offset| start + 4 + offset + 3)
            .unwrap_or(input.len());
        return Some((TokenKind::Markup, end));
    }
    if second == b'!' || second == b'?' {
        let end = rest.find('>').map(|offset| start + offset + 1)?;
        return Some((TokenKind::Markup, end));
    }

    let (closing, name_start) = if second == b'/' { (true, 2) } else { (false, 1) };
    if !bytes.get(name_start)?.is_ascii_alphabetic() {
        return None;
    }
    let mut name_end = name_start;
    while name_end < bytes.len()
        && (bytes[name_end].is_ascii_alphanumeric() || matches!(bytes[name_end], b'-' | b':'))
    {
        name_end += 1;
    }
    let close_offset = find_tag_end(rest, name_end)?;
    let name = rest[name_start..name_end].to_ascii_lowercase();
    let end = start + close_offset + 1;

    if closing {
        return Some((TokenKind::Close { name }, end));
    }
    let section = &rest[name_end..close_offset];
    let self_closing = section.trim_end().ends_with('/') || is_void_element(&name);
    Some((
        TokenKind::Open {
            attrs: parse_attributes(section),
            name,
            self_closing,
        },
        end,
    ))
}

/// Offset of the `>` ending a tag, skipping quoted attribute values.
fn find_tag_end(tag: &str, from: usize) -> Option<usize> {
    let mut quote = None;
    for (offset, byte) in tag.as_bytes()[from..].iter().enumerate() {
        match (quote, byte) {
            (Some(q), b) if *b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(*byte),
            (None, b'>') => return Some(from + offset),
            (None, b'<') => return None,
            _ => {}
        }
    }
    None
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

//! Plain text to paragraphs, with wiki links.

use crate::transcode::links::{render_wiki, scan_wiki, TargetResolver};
use crate::transcode::markup::escape_text;

/// Blank lines separate paragraphs; single newlines become breaks.
pub fn render_plain_text(source: &str, resolver: &mut dyn TargetResolver) -> String {
    let mut out = String::new();
    let mut lines: Vec<&str> = Vec::new();
    for line in source.lines().chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            lines.push(line.trim_end());
            continue;
        }
        if lines.is_empty() {
            continue;
        }
        let body = lines
            .iter()
            .map(|line| render_line(line, resolver))
            .collect::<Vec<_>>()
            .join("<br/>");
        out.push_str(&format!("<p>{body}</p>"));
        lines.clear();
    }
    out
}

fn render_line(line: &str, resolver: &mut dyn TargetResolver) -> String {
    let mut out = String::new();
    let mut plain_start = 0;
    let mut i = 0;
    while i < line.len() {
        let rest = &line[i..];
        match scan_wiki(rest) {
            Some((len, inner, embed)) => {
                out.push_str(&escape_text(&line[plain_start..i]));
                out.push_str(&render_wiki(inner, embed, resolver));
                i += len;
                plain_start = i;
            }
            None => i += rest.chars().next().map(char::len_utf8).unwrap_or(1),
        }
    }
    out.push_str(&escape_text(&line[plain_start..]));
    out
}

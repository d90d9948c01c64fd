//! Structural walk over exported HTML notes.
//!
//! Keeps the body, drops `head`, scripts, styles and event-handler
//! attributes, and routes every `a href` and `img src` through the target
//! resolver.

use crate::transcode::cleanup::{canonicalize_breaks, collapse_paragraphs};
use crate::transcode::links::{ResolvedTarget, TargetResolver, NOTE_LINK_SCHEME};
use crate::transcode::markup::{
    decode_entities, is_void_element, render_open, Attribute, TokenKind, Tokenizer,
};

const DROPPED_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "template", "title"];
const UNWRAPPED_ELEMENTS: &[&str] = &["html", "body", "meta", "link", "base"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDocument {
    /// `<title>` text, else the first `<h1>` text.
    pub title: Option<String>,
    pub html: String,
}

pub fn render_html(
    source: &str,
    resolver: &mut dyn TargetResolver,
    collapse_breaks: bool,
) -> HtmlDocument {
    let tokens = Tokenizer::new(source).collect::<Vec<_>>();
    let has_body = tokens.iter().any(|token| token.is_open("body"));

    let mut out = String::new();
    let mut in_body = !has_body;
    let mut dropped_depth = 0usize;
    let mut in_title = false;
    let mut title = String::new();
    let mut h1_depth = 0usize;
    let mut h1_done = false;
    let mut h1_text = String::new();

    for token in &tokens {
        match &token.kind {
            TokenKind::Open {
                name,
                attrs,
                self_closing,
            } => {
                if name == "body" {
                    in_body = true;
                    continue;
                }
                if DROPPED_ELEMENTS.contains(&name.as_str()) {
                    if !self_closing {
                        dropped_depth += 1;
                        in_title |= name == "title";
                    }
                    continue;
                }
                if dropped_depth > 0 || !in_body || UNWRAPPED_ELEMENTS.contains(&name.as_str()) {
                    continue;
                }
                if name == "h1" && !h1_done {
                    h1_depth += 1;
                }
                let attrs = rewrite_attributes(name, attrs, resolver);
                out.push_str(&render_open(name, &attrs));
            }
            TokenKind::Close { name } => {
                if name == "body" {
                    in_body = !has_body;
                    continue;
                }
                if DROPPED_ELEMENTS.contains(&name.as_str()) {
                    dropped_depth = dropped_depth.saturating_sub(1);
                    if name == "title" {
                        in_title = false;
                    }
                    continue;
                }
                if dropped_depth > 0
                    || !in_body
                    || UNWRAPPED_ELEMENTS.contains(&name.as_str())
                    || is_void_element(name)
                {
                    continue;
                }
                if name == "h1" && h1_depth > 0 {
                    h1_depth -= 1;
                    h1_done = h1_depth == 0;
                }
                out.push_str(&format!("</{name}>"));
            }
            TokenKind::Text => {
                let raw = token.raw(source);
                if in_title {
                    title.push_str(&decode_entities(raw));
                }
                if dropped_depth > 0 || !in_body {
                    continue;
                }
                if h1_depth > 0 {
                    h1_text.push_str(&decode_entities(raw));
                }
                out.push_str(raw);
            }
            TokenKind::Markup => {}
        }
    }

    let html = canonicalize_breaks(&out, collapse_breaks);
    let html = collapse_paragraphs(&html).trim().to_string();
    let title = normalize_space(&title)
        .or_else(|| normalize_space(&h1_text));
    HtmlDocument { title, html }
}

fn normalize_space(text: &str) -> Option<String> {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn rewrite_attributes(
    element: &str,
    attrs: &[Attribute],
    resolver: &mut dyn TargetResolver,
) -> Vec<Attribute> {
    let mut out = Vec::with_capacity(attrs.len());
    for attr in attrs {
        if attr.name.starts_with("on") {
            continue;
        }
        let value = attr.value.as_deref().unwrap_or("");
        match (element, attr.name.as_str()) {
            ("a", "href") => match resolver.resolve_link(value) {
                ResolvedTarget::Note { note_id } => out.push(Attribute {
                    name: attr.name.clone(),
                    value: Some(format!("{NOTE_LINK_SCHEME}{note_id}")),
                }),
                ResolvedTarget::Asset(record) => out.push(Attribute {
                    name: attr.name.clone(),
                    value: Some(record.relative_path),
                }),
                ResolvedTarget::External(url) => out.push(Attribute {
                    name: attr.name.clone(),
                    value: Some(url),
                }),
                ResolvedTarget::Unresolved => {}
            },
            ("img", "src") => {
                let src = match resolver.resolve_image(value) {
                    ResolvedTarget::Asset(record) => record.relative_path,
                    ResolvedTarget::External(url) => url,
                    ResolvedTarget::Note { .. } | ResolvedTarget::Unresolved => value.to_string(),
                };
                out.push(Attribute {
                    name: attr.name.clone(),
                    value: Some(src),
                });
            }
            _ => out.push(attr.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::render_html;
    use crate::transcode::links::{ResolvedTarget, TargetResolver};

    struct Fixed;

    impl TargetResolver for Fixed {
        fn resolve_link(&mut self, href: &str) -> ResolvedTarget {
            match href {
                "Other.html" => ResolvedTarget::Note {
                    note_id: "n2".to_string(),
                },
                "gone.html" => ResolvedTarget::Unresolved,
                _ => ResolvedTarget::External(href.to_string()),
            }
        }

        fn resolve_image(&mut self, src: &str) -> ResolvedTarget {
            ResolvedTarget::External(src.replace("img/", "ab/"))
        }

        fn resolve_wiki(&mut self, _target: &str) -> ResolvedTarget {
            ResolvedTarget::Unresolved
        }
    }

    #[test]
    fn keeps_body_and_takes_title_from_head() {
        let doc = render_html(
            "<!DOCTYPE html><html><head><title>My &amp; Title</title><style>p{}</style></head>\
             <body><h1>Heading</h1><p onclick=\"x()\" class=\"c\">Hi<br></p><script>alert(1)</script></body></html>",
            &mut Fixed,
            true,
        );
        assert_eq!(doc.title.as_deref(), Some("My & Title"));
        assert_eq!(doc.html, "<h1>Heading</h1><p class=\"c\">Hi<br/></p>");
    }

    #[test]
    fn falls_back_to_first_heading() {
        let doc = render_html("<h1>First <b>one</b></h1><h1>Second</h1>", &mut Fixed, true);
        assert_eq!(doc.title.as_deref(), Some("First one"));
    }

    #[test]
    fn links_and_images_are_rewritten() {
        let doc = render_html(
            "<p><a href=\"Other.html\">o</a> <a href=\"gone.html\">g</a> <img src=\"img/x.png\"></p>",
            &mut Fixed,
            true,
        );
        assert_eq!(
            doc.html,
            "<p><a href=\"note://n2\">o</a> <a>g</a> <img src=\"ab/x.png\"/></p>"
        );
        assert_eq!(doc.title, None);
    }
}

//! Legacy rich-text markup to canonical HTML.
//!
//! # Invariants
//! - Passes run in a fixed order: callouts, document cleanup, checkboxes,
//!   media, `div` renaming, callout restore, paragraph collapse.
//! - The output depends only on the input markup, the asset map and
//!   [`EnmlOptions`], so equal inputs always hash equally.

use crate::assets::resolver::mime_for_extension;
use crate::model::asset::AssetMap;
use crate::transcode::cleanup::{canonicalize_breaks, collapse_paragraphs, strip_document_wrappers};
use crate::transcode::markup::{
    escape_attr, escape_text, find_balanced_close, parse_attributes, Attribute, Token, TokenKind,
    Tokenizer,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const CALLOUT_MARKER_ATTR: &str = "data-en-callout";
const CALLOUT_OPEN: &str = "<en-callout>";
const CALLOUT_CLOSE: &str = "</en-callout>";
const CALLOUT_HTML_OPEN: &str = "<div class=\"callout\">";

static TODO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<en-todo\b([^>]*?)/?>(?:\s*</en-todo>)?").expect("valid todo regex")
});
static MEDIA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<en-media\b([^>]*?)/?>(?:\s*</en-media>)?").expect("valid media regex")
});
static DIV_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<div(\s|>|/)").expect("valid div open regex"));
static DIV_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</div\s*>").expect("valid div close regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnmlOptions {
    /// Cap runs of three or more breaks at two.
    pub collapse_breaks: bool,
}

impl Default for EnmlOptions {
    fn default() -> Self {
        Self {
            collapse_breaks: true,
        }
    }
}

/// Runs the full normalization pipeline over one note's markup.
pub fn normalize_enml(raw: &str, assets: &AssetMap, options: EnmlOptions) -> String {
    let text = extract_callouts(raw);
    let text = strip_document_wrappers(&text);
    let text = canonicalize_breaks(&text, options.collapse_breaks);
    let text = expand_checkboxes(&text);
    let text = rewrite_media(&text, assets);
    let text = DIV_OPEN_RE.replace_all(&text, "<p${1}");
    let text = DIV_CLOSE_RE.replace_all(&text, "</p>");
    let text = text
        .replace(CALLOUT_OPEN, CALLOUT_HTML_OPEN)
        .replace(CALLOUT_CLOSE, "</div>");
    collapse_paragraphs(&text).trim().to_string()
}

/// Wraps the body of each marked `div` in a callout marker element.
///
/// The marked `div` is matched against its true closing tag by depth.
/// Scanning resumes after the replacement; an unbalanced marker is left as
/// it is.
pub fn extract_callouts(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    let mut tokens = Tokenizer::new(input);
    while let Some(token) = tokens.next() {
        if !is_callout_open(&token) {
            continue;
        }
        let Some((close_start, close_end)) = find_balanced_close(input, token.end, "div") else {
            continue;
        };
        out.push_str(&input[cursor..token.start]);
        out.push_str(CALLOUT_OPEN);
        out.push_str(&input[token.end..close_start]);
        out.push_str(CALLOUT_CLOSE);
        cursor = close_end;
        tokens = Tokenizer::at(input, close_end);
    }
    out.push_str(&input[cursor..]);
    out
}

fn is_callout_open(token: &Token) -> bool {
    matches!(
        &token.kind,
        TokenKind::Open { name, self_closing: false, .. } if name == "div"
    ) && token.attr(CALLOUT_MARKER_ATTR).is_some()
}

/// Expands checklist markers into disabled checkboxes.
pub fn expand_checkboxes(input: &str) -> String {
    TODO_RE
        .replace_all(input, |caps: &Captures| {
            let attrs = parse_attributes(&caps[1]);
            if attr_value(&attrs, "checked")
                .map(|value| value.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
            {
                "<input type=\"checkbox\" disabled checked/>".to_string()
            } else {
                "<input type=\"checkbox\" disabled/>".to_string()
            }
        })
        .into_owned()
}

/// Rewrites media references whose hash was placed; others are untouched.
pub fn rewrite_media(input: &str, assets: &AssetMap) -> String {
    MEDIA_RE
        .replace_all(input, |caps: &Captures| {
            let attrs = parse_attributes(&caps[1]);
            let Some(hash) = attr_value(&attrs, "hash") else {
                return caps[0].to_string();
            };
            let Some(record) = assets.get(hash.trim()) else {
                return caps[0].to_string();
            };

            let mime = attr_value(&attrs, "type")
                .map(str::to_string)
                .or_else(|| mime_for_extension(&record.extension).map(str::to_string))
                .unwrap_or_default();
            if mime.starts_with("image/") {
                let mut out = format!("<img src=\"{}\"", escape_attr(&record.relative_path));
                for dimension in ["width", "height"] {
                    if let Some(value) = attr_value(&attrs, dimension) {
                        out.push_str(&format!(" {dimension}=\"{}\"", escape_attr(value)));
                    }
                }
                out.push_str(" alt=\"\"/>");
                out
            } else {
                let label = assets
                    .display_name(&record.hash)
                    .unwrap_or(&record.relative_path);
                format!(
                    "<a href=\"{}\">{}</a>",
                    escape_attr(&record.relative_path),
                    escape_text(label)
                )
            }
        })
        .into_owned()
}

fn attr_value<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|attr| attr.name == name)
        .and_then(|attr| attr.value.as_deref())
}

#[cfg(test)]
mod tests {
    use super::{expand_checkboxes, extract_callouts, normalize_enml, EnmlOptions};
    use crate::assets::resolver::place;
    use crate::model::asset::AssetMap;
    use std::path::Path;

    fn normalize(raw: &str) -> String {
        normalize_enml(raw, &AssetMap::new(), EnmlOptions::default())
    }

    #[test]
    fn callout_body_is_matched_by_depth() {
        assert_eq!(
            extract_callouts("<div data-en-callout=\"true\"><div>inner</div>tail</div>after"),
            "<en-callout><div>inner</div>tail</en-callout>after"
        );
    }

    #[test]
    fn three_levels_inside_a_callout_stay_in_its_body() {
        assert_eq!(
            extract_callouts(
                "<div data-en-callout><div><div><div>deep</div></div>mid</div>tail</div>after"
            ),
            "<en-callout><div><div><div>deep</div></div>mid</div>tail</en-callout>after"
        );
    }

    #[test]
    fn callout_inside_a_callout_is_not_rewrapped() {
        assert_eq!(
            extract_callouts(
                "<div data-en-callout><div data-en-callout>inner</div>outer</div>\
                 <div data-en-callout>next</div>"
            ),
            "<en-callout><div data-en-callout>inner</div>outer</en-callout>\
             <en-callout>next</en-callout>"
        );
    }

    #[test]
    fn self_closing_marker_is_not_a_callout() {
        let input = "<div><div data-en-callout/>x</div>y";
        assert_eq!(extract_callouts(input), input);
    }

    #[test]
    fn unbalanced_callout_is_left_alone() {
        let input = "<div data-en-callout><div>inner</div>";
        assert_eq!(extract_callouts(input), input);
    }

    #[test]
    fn callout_becomes_classed_div_with_paragraph_body() {
        assert_eq!(
            normalize("<en-note><div data-en-callout><div>inner</div>tail</div></en-note>"),
            "<div class=\"callout\"><p>inner</p>tail</div>"
        );
    }

    #[test]
    fn checkboxes_expand() {
        assert_eq!(
            expand_checkboxes("<en-todo checked=\"true\"/>a<en-todo checked=\"false\"></en-todo>b<en-todo/>"),
            "<input type=\"checkbox\" disabled checked/>a<input type=\"checkbox\" disabled/>b<input type=\"checkbox\" disabled/>"
        );
    }

    #[test]
    fn placed_media_is_rewritten_and_unknown_media_is_kept() {
        let mut assets = AssetMap::new();
        assets.insert(place(Path::new("/a"), "aabb", "png"));
        assets.insert_named(place(Path::new("/a"), "ccdd", "pdf"), Some("scan & notes.pdf"));

        let html = normalize_enml(
            "<en-note><en-media hash=\"AABB\" type=\"image/png\" width=\"40\"/>\
             <en-media hash=\"ccdd\" type=\"application/pdf\"></en-media>\
             <en-media hash=\"ffff\" type=\"image/png\"/></en-note>",
            &assets,
            EnmlOptions::default(),
        );
        assert_eq!(
            html,
            "<img src=\"aa/aabb.png\" width=\"40\" alt=\"\"/>\
             <a href=\"cc/ccdd.pdf\">scan &amp; notes.pdf</a>\
             <en-media hash=\"ffff\" type=\"image/png\"/>"
        );
    }

    #[test]
    fn empty_paragraphs_disappear() {
        assert_eq!(normalize("<div></div><div></div><div></div><div></div><div></div>"), "");
        assert_eq!(normalize("<div><br></div><div>text</div>"), "<p>text</p>");
        assert_eq!(
            normalize("<div style=\"x\"></div><div style=\"x\"><br></div><div>text</div>"),
            "<p>text</p>"
        );
    }

    #[test]
    fn output_is_deterministic() {
        let raw = "<?xml version=\"1.0\"?><en-note><div>a<br><br><br><br>b</div></en-note>";
        assert_eq!(normalize(raw), normalize(raw));
        assert_eq!(normalize(raw), "<p>a<br/><br/>b</p>");
    }
}

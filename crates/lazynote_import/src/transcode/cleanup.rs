//! Regex passes shared by every markup dialect.

use once_cell::sync::Lazy;
use regex::Regex;

static XML_PROLOG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<\?xml.*?\?>").expect("valid prolog regex"));
static DOCTYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<!DOCTYPE[^>]*>").expect("valid doctype regex"));
static EN_NOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?en-note\b[^>]*>").expect("valid en-note regex"));
static BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*/?\s*br\b[^>]*>").expect("valid break regex"));
static BREAK_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:<br/>\s*){3,}").expect("valid break run regex"));
static NESTED_OPEN_P_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<p>\s*<p>").expect("valid nested open regex"));
static NESTED_CLOSE_P_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</p>\s*</p>").expect("valid nested close regex"));
static ADJACENT_EMPTY_P_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<p\b[^>]*>\s*</p>\s*<p\b[^>]*>\s*</p>").expect("valid adjacent empty regex")
});
static EMPTY_P_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<p\b[^>]*>\s*</p>").expect("valid empty paragraph regex"));
static BREAK_ONLY_P_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<p\b[^>]*>\s*<br/>\s*</p>").expect("valid break paragraph regex")
});

/// Removes the XML prolog, doctype and `en-note` root wrapper.
pub fn strip_document_wrappers(input: &str) -> String {
    let text = XML_PROLOG_RE.replace_all(input, "");
    let text = DOCTYPE_RE.replace_all(&text, "");
    EN_NOTE_RE.replace_all(&text, "").into_owned()
}

/// Rewrites every break form to `<br/>`; optionally caps runs at two.
pub fn canonicalize_breaks(input: &str, collapse_runs: bool) -> String {
    let text = BREAK_RE.replace_all(input, "<br/>");
    if collapse_runs {
        BREAK_RUN_RE.replace_all(&text, "<br/><br/>").into_owned()
    } else {
        text.into_owned()
    }
}

/// Collapses nested and adjacent empty paragraphs to a fixed point, then
/// drops paragraphs that are empty or hold a single break.
pub fn collapse_paragraphs(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = NESTED_OPEN_P_RE.replace_all(&current, "<p>");
        let next = NESTED_CLOSE_P_RE.replace_all(&next, "</p>");
        let next = ADJACENT_EMPTY_P_RE
            .replace_all(&next, "<p></p>")
            .into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    let text = EMPTY_P_RE.replace_all(&current, "");
    BREAK_ONLY_P_RE.replace_all(&text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::{canonicalize_breaks, collapse_paragraphs, strip_document_wrappers};

    #[test]
    fn wrappers_are_stripped() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE en-note SYSTEM \"x.dtd\"><en-note style=\"a\">body</en-note>";
        assert_eq!(strip_document_wrappers(input).trim(), "body");
    }

    #[test]
    fn break_forms_canonicalize_and_runs_cap_at_two() {
        assert_eq!(
            canonicalize_breaks("a<br>b<BR />c<br/><br> <br></br>d", true),
            "a<br/>b<br/>c<br/><br/>d"
        );
        assert_eq!(
            canonicalize_breaks("a<br><br><br>b", false),
            "a<br/><br/><br/>b"
        );
    }

    #[test]
    fn five_empty_paragraphs_collapse_to_nothing() {
        assert_eq!(collapse_paragraphs(&"<p></p>".repeat(5)), "");
    }

    #[test]
    fn empty_paragraphs_with_attributes_are_dropped() {
        assert_eq!(
            collapse_paragraphs(
                "<p style=\"x\"></p><p class=\"a\"> </p><p dir=\"ltr\"><br/></p><p id=\"k\">kept</p>"
            ),
            "<p id=\"k\">kept</p>"
        );
        assert_eq!(collapse_paragraphs("<pre></pre>"), "<pre></pre>");
    }

    #[test]
    fn nested_paragraphs_flatten() {
        assert_eq!(
            collapse_paragraphs("<p><p>text</p></p><p><br/></p><p> </p>"),
            "<p>text</p>"
        );
    }
}

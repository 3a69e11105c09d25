//! Body and title extraction for spine content documents.
//!
//! Content documents are frequently not well-formed XML, so this works on
//! the raw markup with patterns instead of a DOM.

use std::sync::OnceLock;

use regex::Regex;

/// Body markup and title candidate pulled from one content document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterContent {
    pub body: String,
    pub title: Option<String>,
}

fn pattern(cell: &'static OnceLock<Regex>, re: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(re).expect("valid regex"))
}

pub fn extract(markup: &str) -> ChapterContent {
    ChapterContent {
        body: extract_body(markup),
        title: extract_title(markup),
    }
}

/// Inner markup of `<body>`; when there is no body element, the document
/// minus prolog, doctype, head and html wrappers.
pub fn extract_body(markup: &str) -> String {
    static BODY: OnceLock<Regex> = OnceLock::new();
    static PROLOG: OnceLock<Regex> = OnceLock::new();
    static DOCTYPE: OnceLock<Regex> = OnceLock::new();
    static HEAD: OnceLock<Regex> = OnceLock::new();
    static WRAPPER: OnceLock<Regex> = OnceLock::new();

    if let Some(caps) = pattern(&BODY, r"(?is)<body\b[^>]*>(.*)</body\s*>").captures(markup) {
        return caps[1].trim().to_string();
    }

    let text = pattern(&PROLOG, r"(?is)<\?xml.*?\?>").replace_all(markup, "");
    let text = pattern(&DOCTYPE, r"(?is)<!DOCTYPE[^>]*>").replace_all(&text, "");
    let text = pattern(&HEAD, r"(?is)<head\b.*?</head\s*>").replace_all(&text, "");
    let text = pattern(&WRAPPER, r"(?is)</?(?:html|body)\b[^>]*>").replace_all(&text, "");
    text.trim().to_string()
}

/// First non-empty of `<title>`, `<h1>`, `<h2>`, as plain text.
pub fn extract_title(markup: &str) -> Option<String> {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    static H1: OnceLock<Regex> = OnceLock::new();
    static H2: OnceLock<Regex> = OnceLock::new();

    [
        pattern(&TITLE, r"(?is)<title\b[^>]*>(.*?)</title\s*>"),
        pattern(&H1, r"(?is)<h1\b[^>]*>(.*?)</h1\s*>"),
        pattern(&H2, r"(?is)<h2\b[^>]*>(.*?)</h2\s*>"),
    ]
    .into_iter()
    .find_map(|re| {
        re.captures(markup)
            .map(|caps| plain_text(&caps[1]))
            .filter(|t| !t.is_empty())
    })
}

/// Strip tags, decode entities, collapse whitespace.
pub fn plain_text(fragment: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let stripped = pattern(&TAG, r"(?s)<[^>]*>").replace_all(fragment, "");
    let decoded = html_escape::decode_html_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_extraction() {
        let doc = r#"<?xml version="1.0"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>T</title></head>
<body class="x">
  <p>Hello</p>
</body></html>"#;
        assert_eq!(extract_body(doc), "<p>Hello</p>");
    }

    #[test]
    fn test_missing_body_strips_wrappers() {
        let doc = r#"<?xml version="1.0"?><!DOCTYPE html><html><head><title>T</title></head><p>Loose</p></html>"#;
        assert_eq!(extract_body(doc), "<p>Loose</p>");
    }

    #[test]
    fn test_title_priority() {
        let both = "<html><head><title>Doc</title></head><body><h1>Head</h1></body></html>";
        assert_eq!(extract_title(both).as_deref(), Some("Doc"));

        let empty_title = "<title>  </title><body><h1>The <em>First</em></h1><h2>Sub</h2></body>";
        assert_eq!(extract_title(empty_title).as_deref(), Some("The First"));

        let only_h2 = "<body><h2 id=\"a\">Second &amp; Last</h2></body>";
        assert_eq!(extract_title(only_h2).as_deref(), Some("Second & Last"));

        assert_eq!(extract_title("<body><p>none</p></body>"), None);
    }

    #[test]
    fn test_extract_combines() {
        let content = extract("<html><body><h1>One</h1><p>x</p></body></html>");
        assert_eq!(content.title.as_deref(), Some("One"));
        assert_eq!(content.body, "<h1>One</h1><p>x</p>");
    }
}

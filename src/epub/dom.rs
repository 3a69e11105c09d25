//! Narrow DOM capability interface used by the OPF and TOC walkers.
//!
//! The traversal code in [`super::opf`] and [`super::toc`] is written against
//! [`DomElement`] only; `roxmltree` is the single implementation.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use roxmltree::{Document, Node, ParsingOptions};

use super::error::{EpubError, Result};

pub trait DomElement: Copy {
    /// Tag name without namespace prefix.
    fn local_name(&self) -> &str;

    /// Attribute value looked up by local name (`epub:type` matches `type`).
    fn attr(&self, name: &str) -> Option<&str>;

    fn child_elements(&self) -> Vec<Self>;

    /// All descendant elements with the given local name, document order.
    fn elements_by_tag(&self, tag: &str) -> Vec<Self>;

    fn first_by_tag(&self, tag: &str) -> Option<Self> {
        self.elements_by_tag(tag).into_iter().next()
    }

    fn first_child_by_tag(&self, tag: &str) -> Option<Self> {
        self.child_elements().into_iter().find(|c| c.local_name() == tag)
    }

    /// Concatenated descendant text.
    fn text_content(&self) -> String;
}

impl<'a, 'input: 'a> DomElement for Node<'a, 'input> {
    fn local_name(&self) -> &str {
        self.tag_name().name()
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes().find(|a| a.name() == name).map(|a| a.value())
    }

    fn child_elements(&self) -> Vec<Self> {
        self.children().filter(|n| n.is_element()).collect()
    }

    fn elements_by_tag(&self, tag: &str) -> Vec<Self> {
        self.descendants()
            .skip(1)
            .filter(|n| n.is_element() && n.tag_name().name() == tag)
            .collect()
    }

    fn text_content(&self) -> String {
        self.descendants()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect()
    }
}

/// Parse an XML or XHTML document from the archive.
///
/// DTDs are allowed (XHTML content documents carry a doctype) and named HTML
/// entities are converted to numeric references first.
pub fn parse_document<'i>(path: &str, text: &'i str) -> Result<Document<'i>> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options).map_err(|e| EpubError::Xml {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Replace HTML named entities, which XML parsers reject, with numeric
/// character references. The five XML entities are left alone.
pub fn normalize_entities(text: &str) -> std::borrow::Cow<'_, str> {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    let re = ENTITY.get_or_init(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").expect("valid regex"));

    re.replace_all(text, |caps: &Captures| {
        let whole = &caps[0];
        match &caps[1] {
            "lt" | "gt" | "amp" | "quot" | "apos" => whole.to_string(),
            _ => {
                let decoded = html_escape::decode_html_entities(whole);
                if decoded == whole {
                    // Unknown entity; drop it rather than fail the parse.
                    String::new()
                } else {
                    decoded.chars().map(|c| format!("&#{};", c as u32)).collect()
                }
            }
        }
    })
}

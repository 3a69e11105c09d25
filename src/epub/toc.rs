//! Table of contents resolution: legacy NCX, modern nav document, or a
//! synthesized flat list when the archive has neither.
//!
//! Entry hrefs are resolved against the directory of the document that
//! declares them, so they compare directly with chapter archive paths.

use super::dom::{DomElement, normalize_entities, parse_document};
use super::error::Result;
use super::paths::{base_dir, resolve_href};
use crate::models::{Chapter, TocTree, split_fragment};

/// Which strategy produced a book's TOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocSource {
    Ncx,
    Nav,
    Spine,
}

/// Parse a navigation-control (NCX) document.
pub fn parse_ncx(path: &str, text: &str) -> Result<TocTree> {
    let text = normalize_entities(text);
    let doc = parse_document(path, &text)?;
    let base = base_dir(path);
    let mut tree = TocTree::new();

    if let Some(nav_map) = doc.root_element().first_by_tag("navMap") {
        walk_nav_points(nav_map, None, &base, &mut tree);
    }
    Ok(tree)
}

fn walk_nav_points<E: DomElement>(parent: E, parent_idx: Option<usize>, base: &str, tree: &mut TocTree) {
    for point in parent.child_elements().into_iter().filter(|c| c.local_name() == "navPoint") {
        let title = point
            .first_child_by_tag("navLabel")
            .and_then(|label| label.first_by_tag("text"))
            .map(|t| collapse_whitespace(&t.text_content()))
            .unwrap_or_default();
        let href = point
            .first_child_by_tag("content")
            .and_then(|c| c.attr("src").map(|src| resolve_target(src, base)))
            .unwrap_or_default();

        let idx = match parent_idx {
            Some(p) => tree.push_child(p, title, href),
            None => tree.push_root(title, href),
        };
        walk_nav_points(point, Some(idx), base, tree);
    }
}

/// Parse a modern navigation document.
///
/// Uses the `<nav epub:type="toc">` element when present, otherwise the first
/// `<nav>` that holds an ordered list.
pub fn parse_nav(path: &str, text: &str) -> Result<TocTree> {
    let text = normalize_entities(text);
    let doc = parse_document(path, &text)?;
    let base = base_dir(path);
    let mut tree = TocTree::new();

    let navs = doc.root_element().elements_by_tag("nav");
    let list = navs
        .iter()
        .find(|nav| {
            nav.attr("type")
                .is_some_and(|t| t.split_whitespace().any(|v| v == "toc"))
        })
        .and_then(|nav| nav.first_by_tag("ol"))
        .or_else(|| navs.iter().find_map(|nav| nav.first_by_tag("ol")));

    if let Some(ol) = list {
        walk_list(ol, None, &base, &mut tree);
    }
    Ok(tree)
}

fn walk_list<E: DomElement>(ol: E, parent_idx: Option<usize>, base: &str, tree: &mut TocTree) {
    for li in ol.child_elements().into_iter().filter(|c| c.local_name() == "li") {
        let anchor = li.first_child_by_tag("a");
        let label = anchor.or_else(|| li.first_child_by_tag("span"));
        let nested = li.first_child_by_tag("ol");

        let title = label
            .map(|l| collapse_whitespace(&l.text_content()))
            .unwrap_or_default();
        let href = anchor
            .and_then(|a| a.attr("href").map(|h| resolve_target(h, base)))
            .unwrap_or_default();

        if title.is_empty() && href.is_empty() && nested.is_none() {
            continue;
        }

        let idx = match parent_idx {
            Some(p) => tree.push_child(p, title, href),
            None => tree.push_root(title, href),
        };
        if let Some(nested) = nested {
            walk_list(nested, Some(idx), base, tree);
        }
    }
}

/// One flat entry per chapter, titled `Chapter N`.
pub fn spine_fallback(chapters: &[Chapter]) -> TocTree {
    let mut tree = TocTree::new();
    for (i, chapter) in chapters.iter().enumerate() {
        tree.push_root(format!("Chapter {}", i + 1), chapter.href.clone());
    }
    tree
}

/// Resolve a TOC target to an archive path, keeping any fragment.
fn resolve_target(target: &str, base: &str) -> String {
    let (path, fragment) = split_fragment(target.trim());
    // Same-document fragments have no path to resolve.
    if path.is_empty() {
        return fragment.map(|f| format!("#{f}")).unwrap_or_default();
    }
    let resolved = resolve_href(path, base);
    match fragment {
        Some(f) => format!("{resolved}#{f}"),
        None => resolved,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

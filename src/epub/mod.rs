//! EPUB archive parsing.
//!
//! [`parse`] turns the raw bytes of an EPUB into a [`ProcessedBook`]:
//! container pointer, package document, spine chapters, resources, then the
//! table of contents. Structural problems abort the parse; a single missing
//! chapter or resource is logged and skipped.

pub mod archive;
pub mod chapter;
pub mod dom;
pub mod error;
pub mod opf;
pub mod paths;
pub mod toc;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

pub use archive::EpubArchive;
pub use error::{EpubError, Result};
pub use toc::TocSource;

use crate::models::{Chapter, ProcessedBook, Resource, TocTree};
use opf::{CSS_MEDIA_TYPE, Package};

/// Parse an EPUB held in memory. `book_id` becomes [`ProcessedBook::id`] and
/// the identifier fallback when the package declares none.
pub fn parse(book_id: &str, data: &[u8]) -> Result<ProcessedBook> {
    let mut archive = EpubArchive::open(data)?;

    let container = archive.read_container()?;
    let opf_path = opf::find_rootfile(&container)?;
    let opf_text = archive.read_text(&opf_path).map_err(|e| match e {
        EpubError::ResourceNotFound(path) => {
            EpubError::ArchiveStructure(format!("package document {path} is missing"))
        }
        other => other,
    })?;
    let package = opf::parse_package(&opf_path, &opf_text, book_id)?;

    let chapters = read_chapters(&mut archive, &package)?;
    let (resources, css) = read_resources(&mut archive, &package, &chapters)?;
    let (toc, source) = build_toc(&mut archive, &package, &chapters);

    debug!(
        book_id,
        chapters = chapters.len(),
        resources = resources.len(),
        toc_entries = toc.node_count(),
        toc_source = ?source,
        "Parsed archive"
    );

    Ok(ProcessedBook {
        id: book_id.to_string(),
        metadata: package.metadata,
        chapters,
        toc,
        resources,
        css,
    })
}

fn read_chapters(archive: &mut EpubArchive<'_>, package: &Package) -> Result<Vec<Chapter>> {
    let mut chapters = Vec::new();
    let mut seen = HashSet::new();

    for spine_item in package.spine.iter().filter(|s| s.linear) {
        let Some(item) = package.item(&spine_item.idref) else {
            warn!(idref = %spine_item.idref, "Spine references unknown manifest item");
            continue;
        };
        if !item.is_xhtml() || !seen.insert(item.id.as_str()) {
            continue;
        }

        let markup = match archive.read_text(&item.href) {
            Ok(markup) => markup,
            Err(e) if e.is_scoped() => {
                warn!(href = %item.href, error = %e, "Skipping missing chapter");
                continue;
            }
            Err(e) => return Err(e),
        };

        let content = chapter::extract(&markup);
        let order = chapters.len();
        chapters.push(Chapter {
            id: item.id.clone(),
            href: item.href.clone(),
            title: content
                .title
                .unwrap_or_else(|| format!("Chapter {}", order + 1)),
            order,
            html: content.body,
        });
    }
    Ok(chapters)
}

fn read_resources(
    archive: &mut EpubArchive<'_>,
    package: &Package,
    chapters: &[Chapter],
) -> Result<(BTreeMap<String, Resource>, Vec<String>)> {
    let chapter_hrefs: HashSet<&str> = chapters.iter().map(|c| c.href.as_str()).collect();
    let nav_href = package.nav_item().map(|i| i.href.as_str());
    let ncx_href = package.ncx_item().map(|i| i.href.as_str());

    let mut resources = BTreeMap::new();
    let mut css = Vec::new();

    for item in package.items() {
        let href = item.href.as_str();
        if chapter_hrefs.contains(href) || Some(href) == nav_href || Some(href) == ncx_href {
            continue;
        }

        let data = match archive.read_bytes(href) {
            Ok(data) => data,
            Err(e) if e.is_scoped() => {
                warn!(href, error = %e, "Skipping missing resource");
                continue;
            }
            Err(e) => return Err(e),
        };

        if item.media_type == CSS_MEDIA_TYPE {
            css.push(String::from_utf8_lossy(&data).into_owned());
        }

        let media_type = if item.media_type.is_empty() {
            mime_guess::from_path(href)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        } else {
            item.media_type.clone()
        };

        resources.insert(
            item.href.clone(),
            Resource {
                id: item.id.clone(),
                href: item.href.clone(),
                media_type,
                data,
            },
        );
    }
    Ok((resources, css))
}

/// NCX first, then the nav document, then one entry per chapter. A TOC
/// document that is missing, malformed or empty falls through to the next
/// strategy.
fn build_toc(
    archive: &mut EpubArchive<'_>,
    package: &Package,
    chapters: &[Chapter],
) -> (TocTree, TocSource) {
    type TocParser = fn(&str, &str) -> Result<TocTree>;
    let candidates: [(TocSource, Option<&opf::ManifestItem>, TocParser); 2] = [
        (TocSource::Ncx, package.ncx_item(), toc::parse_ncx),
        (TocSource::Nav, package.nav_item(), toc::parse_nav),
    ];

    for (source, item, parse) in candidates {
        let Some(item) = item else { continue };
        let parsed = archive
            .read_text(&item.href)
            .and_then(|text| parse(&item.href, &text));
        match parsed {
            Ok(tree) if !tree.is_empty() => return (tree, source),
            Ok(_) => debug!(href = %item.href, ?source, "TOC document has no entries"),
            Err(e) => warn!(href = %item.href, ?source, error = %e, "Unusable TOC document"),
        }
    }

    (toc::spine_fallback(chapters), TocSource::Spine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{EpubFixture, TocStyle};

    #[test]
    fn test_parse_basic_book() {
        let data = EpubFixture::new("A Book")
            .author("Ann Author")
            .chapter("First", "<p>one</p>")
            .chapter("Second", "<p>two</p>")
            .build();

        let book = parse("book-1", &data).unwrap();
        assert_eq!(book.id, "book-1");
        assert_eq!(book.metadata.title, "A Book");
        assert_eq!(book.metadata.author_line(), "Ann Author");
        assert_eq!(book.chapters.len(), 2);
        for (i, chapter) in book.chapters.iter().enumerate() {
            assert_eq!(chapter.order, i);
        }
        assert_eq!(book.chapters[0].title, "First");
        assert!(book.chapters[1].html.contains("<p>two</p>"));
    }

    #[test]
    fn test_escaped_hrefs_find_their_entries() {
        let data = EpubFixture::new("Escaped")
            .file_stem("chapter [part] ")
            .chapter("First", "<p>one</p>")
            .chapter("Second", "<p>two</p>")
            .image("fig 1.png", b"png")
            .toc_style(TocStyle::Both)
            .build();

        let book = parse("b", &data).unwrap();
        assert_eq!(book.chapters.len(), 2);
        assert_eq!(book.chapters[0].href, "OEBPS/text/chapter [part] 1.xhtml");
        assert!(book.resources.contains_key("OEBPS/images/fig 1.png"));

        let first = book.toc.root_nodes().next().unwrap();
        let chapter = book.toc.chapter_for(first, &book.chapters).unwrap();
        assert_eq!(chapter.id, book.chapters[0].id);
    }

    #[test]
    fn test_ncx_preferred_over_nav() {
        let data = EpubFixture::new("Both")
            .chapter("One", "<p>1</p>")
            .chapter("Two", "<p>2</p>")
            .toc_style(TocStyle::Both)
            .build();
        let book = parse("b", &data).unwrap();
        assert_eq!(book.toc.len(), 2);
        let first = book.toc.root_nodes().next().unwrap();
        assert!(first.title.starts_with("NCX "));
    }

    #[test]
    fn test_nav_used_without_ncx() {
        let data = EpubFixture::new("Nav")
            .chapter("One", "<p>1</p>")
            .toc_style(TocStyle::Nav)
            .build();
        let book = parse("b", &data).unwrap();
        let first = book.toc.root_nodes().next().unwrap();
        assert!(first.title.starts_with("Nav "));
        assert!(book.toc.chapter_for(first, &book.chapters).is_some());
    }

    #[test]
    fn test_spine_fallback_without_toc() {
        let data = EpubFixture::new("None")
            .chapter("One", "<p>1</p>")
            .chapter("Two", "<p>2</p>")
            .toc_style(TocStyle::None)
            .build();
        let book = parse("b", &data).unwrap();
        let titles: Vec<&str> = book.toc.root_nodes().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Chapter 1", "Chapter 2"]);
    }

    #[test]
    fn test_missing_chapter_is_skipped() {
        let data = EpubFixture::new("Gap")
            .chapter("One", "<p>1</p>")
            .missing_chapter("Ghost")
            .chapter("Three", "<p>3</p>")
            .build();
        let book = parse("b", &data).unwrap();
        assert_eq!(book.chapters.len(), 2);
        assert_eq!(book.chapters[1].title, "Three");
        assert_eq!(book.chapters[1].order, 1);
    }

    #[test]
    fn test_resources_and_css() {
        let data = EpubFixture::new("Styled")
            .chapter("One", r#"<p><img src="../images/pic.png"/></p>"#)
            .stylesheet("p { color: red; }")
            .image("pic.png", b"\x89PNG-data")
            .build();
        let book = parse("b", &data).unwrap();
        assert_eq!(book.css, vec!["p { color: red; }".to_string()]);
        let image = book.resources.get("OEBPS/images/pic.png").unwrap();
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.data, b"\x89PNG-data");
        assert!(book.resources.contains_key("OEBPS/styles/book.css"));
        assert!(!book.resources.keys().any(|k| k.ends_with(".xhtml") || k.ends_with(".ncx")));
    }

    #[test]
    fn test_missing_container_is_fatal() {
        let data = EpubFixture::new("Broken").chapter("One", "x").without_container().build();
        let err = parse("b", &data).unwrap_err();
        assert!(matches!(err, EpubError::ArchiveStructure(_)));
    }

    #[test]
    fn test_title_fallback() {
        let data = EpubFixture::new("Untitled")
            .raw_chapter("<html><body><p>no heading</p></body></html>")
            .build();
        let book = parse("b", &data).unwrap();
        assert_eq!(book.chapters[0].title, "Chapter 1");
    }
}

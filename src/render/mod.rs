//! Turns a parsed book into the artifacts the store keeps: one HTML
//! document per chapter, an index page and the combined stylesheet.

pub mod chapter;
pub mod css;
pub mod index;

use serde::{Deserialize, Serialize};

pub use chapter::{RESOURCE_PREFIX, STYLESHEET_NAME, chapter_file_name};

use crate::models::ProcessedBook;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedChapter {
    pub id: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedBook {
    pub chapters: Vec<RenderedChapter>,
    pub index: String,
    pub css: String,
}

pub fn render(book: &ProcessedBook) -> RenderedBook {
    let chapters = book
        .chapters
        .iter()
        .map(|c| RenderedChapter {
            id: c.id.clone(),
            html: chapter::render_chapter(&book.metadata, c, &book.resources),
        })
        .collect();

    RenderedBook {
        chapters,
        index: index::render_index(book),
        css: css::combined_css(&book.css),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub;
    use crate::fixtures::EpubFixture;

    #[test]
    fn test_render_sample_book() {
        let book = epub::parse("sample", &EpubFixture::sample().build()).unwrap();
        let rendered = render(&book);

        assert_eq!(rendered.chapters.len(), book.chapters.len());
        assert_eq!(rendered.chapters[0].id, book.chapters[0].id);
        assert!(rendered.chapters[0].html.contains("resources/OEBPS/images/map.png"));
        assert!(!rendered.chapters[0].html.contains("../styles/book.css"));
        assert!(rendered.css.starts_with("p { text-indent: 1.5em; }"));
        assert!(rendered.index.contains("Table of Contents"));
    }
}

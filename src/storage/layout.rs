//! Remote object layout. Every book lives under `books/<id>/`:
//!
//! ```text
//! books/<id>/book-data            BookRecord (JSON)
//! books/<id>/index                index document (HTML)
//! books/<id>/styles               combined stylesheet (CSS)
//! books/<id>/chapters/<chapter>   rendered chapter (HTML)
//! books/<id>/resources/<path>     raw archive resource
//! ```

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_CSS: &str = "text/css; charset=utf-8";

/// Object written by `ensure_bucket`.
pub const BUCKET_MARKER_KEY: &str = ".epubvault";

pub fn book_prefix(book_id: &str) -> String {
    format!("books/{book_id}/")
}

pub fn book_data_key(book_id: &str) -> String {
    format!("books/{book_id}/book-data")
}

pub fn index_key(book_id: &str) -> String {
    format!("books/{book_id}/index")
}

pub fn styles_key(book_id: &str) -> String {
    format!("books/{book_id}/styles")
}

pub fn chapters_prefix(book_id: &str) -> String {
    format!("books/{book_id}/chapters/")
}

pub fn resources_prefix(book_id: &str) -> String {
    format!("books/{book_id}/resources/")
}

pub fn chapter_key(book_id: &str, chapter_id: &str) -> String {
    format!("books/{book_id}/chapters/{chapter_id}")
}

pub fn resource_key(book_id: &str, path: &str) -> String {
    format!("books/{book_id}/resources/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_share_book_prefix() {
        let prefix = book_prefix("b1");
        for key in [
            book_data_key("b1"),
            index_key("b1"),
            styles_key("b1"),
            chapter_key("b1", "ch1"),
            resource_key("b1", "OEBPS/images/a.png"),
        ] {
            assert!(key.starts_with(&prefix), "{key}");
        }
        assert_eq!(chapter_key("b1", "ch1"), "books/b1/chapters/ch1");
    }
}

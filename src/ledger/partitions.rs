/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `books`: book:{book_id} -> BookRecord (JSON)
///            book-index:{book_id} -> index document (UTF-8)
///            book-styles:{book_id} -> combined stylesheet (UTF-8)
/// - `chapters`: chapter:{book_id}:{chapter_id} -> rendered HTML (UTF-8)
/// - `resources`: resource:{book_id}:{archive_path} -> raw bytes
/// - `catalog`: catalog -> Vec<CatalogEntry> (JSON, newest first)
/// - `history`: history -> Vec<ReadingHistoryEntry> (JSON, newest first)
/// - `sync_queue`: sync:{book_id} -> SyncStatus (JSON)
///
/// Book ids never contain `:`, so `{book_id}:` prefixes are unambiguous.

pub const PARTITION_BOOKS: &str = "books";
pub const PARTITION_CHAPTERS: &str = "chapters";
pub const PARTITION_RESOURCES: &str = "resources";
pub const PARTITION_CATALOG: &str = "catalog";
pub const PARTITION_HISTORY: &str = "history";
pub const PARTITION_SYNC_QUEUE: &str = "sync_queue";

pub const CATALOG_KEY: &[u8] = b"catalog";
pub const HISTORY_KEY: &[u8] = b"history";

/// Encode a book record key: book:{book_id}
pub fn encode_book_key(book_id: &str) -> Vec<u8> {
    format!("book:{book_id}").into_bytes()
}

/// Decode a book record key: book:{book_id} -> book_id
pub fn decode_book_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("book:").map(String::from)
}

pub fn encode_index_key(book_id: &str) -> Vec<u8> {
    format!("book-index:{book_id}").into_bytes()
}

pub fn encode_styles_key(book_id: &str) -> Vec<u8> {
    format!("book-styles:{book_id}").into_bytes()
}

/// Encode a chapter key: chapter:{book_id}:{chapter_id}
pub fn encode_chapter_key(book_id: &str, chapter_id: &str) -> Vec<u8> {
    format!("chapter:{book_id}:{chapter_id}").into_bytes()
}

/// Encode a chapter prefix for range scan: chapter:{book_id}:
pub fn encode_chapter_prefix(book_id: &str) -> Vec<u8> {
    format!("chapter:{book_id}:").into_bytes()
}

/// Decode a chapter key: chapter:{book_id}:{chapter_id} -> (book_id, chapter_id)
pub fn decode_chapter_key(key: &[u8]) -> Option<(String, String)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (book_id, chapter_id) = key_str.strip_prefix("chapter:")?.split_once(':')?;
    Some((book_id.to_string(), chapter_id.to_string()))
}

/// Encode a resource key: resource:{book_id}:{path}
pub fn encode_resource_key(book_id: &str, path: &str) -> Vec<u8> {
    format!("resource:{book_id}:{path}").into_bytes()
}

pub fn encode_resource_prefix(book_id: &str) -> Vec<u8> {
    format!("resource:{book_id}:").into_bytes()
}

/// Decode a resource key into (book_id, path)
pub fn decode_resource_key(key: &[u8]) -> Option<(String, String)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (book_id, path) = key_str.strip_prefix("resource:")?.split_once(':')?;
    Some((book_id.to_string(), path.to_string()))
}

/// Encode a sync queue key: sync:{book_id}
pub fn encode_sync_key(book_id: &str) -> Vec<u8> {
    format!("sync:{book_id}").into_bytes()
}

pub fn decode_sync_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("sync:").map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_key_encoding() {
        let key = encode_book_key("book_123");
        assert_eq!(key, b"book:book_123");
        assert_eq!(decode_book_key(&key).unwrap(), "book_123");
        assert_eq!(decode_book_key(b"book-index:book_123"), None);
    }

    #[test]
    fn test_chapter_key_encoding() {
        let key = encode_chapter_key("book_123", "ch:1");
        assert_eq!(key, b"chapter:book_123:ch:1");

        let (book_id, chapter_id) = decode_chapter_key(&key).unwrap();
        assert_eq!(book_id, "book_123");
        assert_eq!(chapter_id, "ch:1");
        assert!(key.starts_with(&encode_chapter_prefix("book_123")));
        assert!(!key.starts_with(&encode_chapter_prefix("book_12")));
    }

    #[test]
    fn test_resource_key_encoding() {
        let key = encode_resource_key("b1", "OEBPS/images/a.png");
        assert_eq!(key, b"resource:b1:OEBPS/images/a.png");
        let (book_id, path) = decode_resource_key(&key).unwrap();
        assert_eq!(book_id, "b1");
        assert_eq!(path, "OEBPS/images/a.png");
    }

    #[test]
    fn test_sync_key_encoding() {
        let key = encode_sync_key("b1");
        assert_eq!(key, b"sync:b1");
        assert_eq!(decode_sync_key(&key).unwrap(), "b1");
    }
}

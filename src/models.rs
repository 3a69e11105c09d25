//! Core data model shared by the parser, renderer, ledger and sync engine.
//!
//! A [`ProcessedBook`] is the immutable result of one successful processing
//! run. Everything persisted afterwards is keyed by the book id carried on
//! it; see [`crate::ledger::partitions`] for the key layout.

use std::collections::BTreeMap;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "Unknown Title";
pub const DEFAULT_CREATOR: &str = "Unknown";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Result of one successful processing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedBook {
    pub id: String,
    pub metadata: BookMetadata,
    /// Spine order; `chapters[i].order == i`.
    pub chapters: Vec<Chapter>,
    pub toc: TocTree,
    /// Keyed by archive-relative path.
    pub resources: BTreeMap<String, Resource>,
    /// Stylesheets found in the archive, manifest order.
    pub css: Vec<String>,
}

impl ProcessedBook {
    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }

    pub fn chapter_ids(&self) -> Vec<String> {
        self.chapters.iter().map(|c| c.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub creators: Vec<Creator>,
    pub language: String,
    pub identifier: String,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub rights: Option<String>,
    #[serde(default)]
    pub cover_href: Option<String>,
}

impl BookMetadata {
    /// Metadata with every required field at its default.
    pub fn with_defaults(identifier: impl Into<String>) -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            creators: vec![Creator::new(DEFAULT_CREATOR)],
            language: DEFAULT_LANGUAGE.to_string(),
            identifier: identifier.into(),
            publisher: None,
            description: None,
            date: None,
            rights: None,
            cover_href: None,
        }
    }

    pub fn creator_names(&self) -> Vec<String> {
        self.creators.iter().map(|c| c.name.clone()).collect()
    }

    /// Display form used by the catalog and reading history.
    pub fn author_line(&self) -> String {
        self.creator_names().join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl Creator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
        }
    }
}

/// One spine-ordered content document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Manifest item id.
    pub id: String,
    /// Archive-relative path of the source document.
    pub href: String,
    pub title: String,
    pub order: usize,
    /// Inner markup of the source `<body>`.
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub href: String,
    pub media_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Table of contents stored as an arena.
///
/// Nodes are addressed by index; `roots` lists the top-level entries in
/// document order and every node lists its children the same way. Nodes are
/// only ever appended, so a child index is always greater than its parent's
/// and the structure cannot contain cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TocTree {
    nodes: Vec<TocNode>,
    roots: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocNode {
    pub title: String,
    /// Archive path, optionally followed by `#fragment`.
    pub href: String,
    pub level: usize,
    pub children: Vec<usize>,
}

impl TocTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_root(&mut self, title: impl Into<String>, href: impl Into<String>) -> usize {
        let idx = self.alloc(title.into(), href.into(), 0);
        self.roots.push(idx);
        idx
    }

    /// Append a child under `parent`. Panics if `parent` is not a node of this tree.
    pub fn push_child(
        &mut self,
        parent: usize,
        title: impl Into<String>,
        href: impl Into<String>,
    ) -> usize {
        let level = self.nodes[parent].level + 1;
        let idx = self.alloc(title.into(), href.into(), level);
        self.nodes[parent].children.push(idx);
        idx
    }

    fn alloc(&mut self, title: String, href: String, level: usize) -> usize {
        self.nodes.push(TocNode {
            title,
            href,
            level,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn node(&self, idx: usize) -> Option<&TocNode> {
        self.nodes.get(idx)
    }

    pub fn root_nodes(&self) -> impl Iterator<Item = &TocNode> {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    pub fn children(&self, idx: usize) -> impl Iterator<Item = &TocNode> {
        self.nodes
            .get(idx)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&i| &self.nodes[i])
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of nodes at every level.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.children.is_empty()).count()
    }

    /// Number of levels; 0 for an empty tree.
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.level + 1).max().unwrap_or(0)
    }

    /// Depth-first, document-order walk yielding `(index, node)`.
    pub fn walk(&self) -> Vec<(usize, &TocNode)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            out.push((idx, node));
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Resolve an entry's href to the chapter it points at.
    ///
    /// Matches on the archive path with the fragment stripped, falling back to
    /// the file name when the exact path is unknown.
    pub fn chapter_for<'a>(&self, node: &TocNode, chapters: &'a [Chapter]) -> Option<&'a Chapter> {
        let (path, _) = split_fragment(&node.href);
        chapters.iter().find(|c| c.href == path).or_else(|| {
            let name = path.rsplit('/').next().unwrap_or(path);
            if name.is_empty() {
                return None;
            }
            let mut matches = chapters
                .iter()
                .filter(|c| c.href.rsplit('/').next() == Some(name));
            match (matches.next(), matches.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        })
    }
}

/// Split `path#fragment` into its parts.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, frag)) => (path, Some(frag).filter(|f| !f.is_empty())),
        None => (href, None),
    }
}

/// Ledger record for a stored book: everything but chapter bodies,
/// resources, the index document and the stylesheet. This is also the
/// `book-data` object uploaded to remote storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: String,
    pub metadata: BookMetadata,
    pub chapter_ids: Vec<String>,
    pub toc: TocTree,
    #[serde(default)]
    pub resource_hrefs: Vec<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl BookRecord {
    pub fn from_book(book: &ProcessedBook) -> Self {
        Self {
            id: book.id.clone(),
            metadata: book.metadata.clone(),
            chapter_ids: book.chapter_ids(),
            toc: book.toc.clone(),
            resource_hrefs: book.resources.keys().cloned().collect(),
            created_at: Utc::now(),
        }
    }
}

/// Flat listing entry for catalog views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub author: String,
    pub chapter_count: usize,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn from_record(record: &BookRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.metadata.title.clone(),
            author: record.metadata.author_line(),
            chapter_count: record.chapter_ids.len(),
            created_at: record.created_at,
        }
    }
}

/// What a reader needs to open a book: its record plus the generated index
/// document and combined stylesheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBook {
    pub record: BookRecord,
    pub index: String,
    pub css: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Syncing,
    Synced,
    Error,
}

/// Per-book replication record kept in the sync queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub book_id: String,
    pub status: SyncState,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub chapters_total: usize,
    #[serde(default)]
    pub chapters_uploaded: usize,
    /// Chapters missing remotely on a book that still counts as synced.
    #[serde(default)]
    pub failed_chapters: Vec<String>,
}

impl SyncStatus {
    pub fn pending(book_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            book_id: book_id.into(),
            status: SyncState::Pending,
            created_at: now,
            updated_at: now,
            synced_at: None,
            error: None,
            chapters_total: 0,
            chapters_uploaded: 0,
            failed_chapters: Vec::new(),
        }
    }

    pub fn mark_syncing(&mut self) {
        self.status = SyncState::Syncing;
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_synced(&mut self, uploaded: usize, total: usize, failed: Vec<String>) {
        let now = Utc::now();
        self.status = SyncState::Synced;
        self.synced_at = Some(now);
        self.updated_at = now;
        self.error = None;
        self.chapters_uploaded = uploaded;
        self.chapters_total = total;
        self.failed_chapters = failed;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SyncState::Error;
        self.error = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn reset_pending(&mut self) {
        self.status = SyncState::Pending;
        self.error = None;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct ReadingHistoryEntry {
    #[builder(into)]
    pub book_id: String,
    #[builder(into)]
    pub title: String,
    #[builder(into)]
    pub author: String,
    #[builder(default = Utc::now())]
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_read: DateTime<Utc>,
    /// Fraction read, clamped to `0.0..=1.0` when stored.
    #[builder(default)]
    pub progress: f32,
    #[builder(into)]
    #[serde(default)]
    pub chapter_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(id: &str, href: &str, order: usize) -> Chapter {
        Chapter {
            id: id.to_string(),
            href: href.to_string(),
            title: id.to_string(),
            order,
            html: String::new(),
        }
    }

    #[test]
    fn test_toc_tree_shape() {
        let mut toc = TocTree::new();
        let part = toc.push_root("Part I", "OEBPS/part1.xhtml");
        let ch1 = toc.push_child(part, "One", "OEBPS/ch1.xhtml");
        toc.push_child(ch1, "One.a", "OEBPS/ch1.xhtml#a");
        toc.push_child(part, "Two", "OEBPS/ch2.xhtml");
        toc.push_root("Appendix", "OEBPS/appendix.xhtml");

        assert_eq!(toc.len(), 2);
        assert_eq!(toc.node_count(), 5);
        assert_eq!(toc.leaf_count(), 3);
        assert_eq!(toc.depth(), 3);

        let titles: Vec<&str> = toc.walk().iter().map(|(_, n)| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Part I", "One", "One.a", "Two", "Appendix"]);

        let levels: Vec<usize> = toc.walk().iter().map(|(_, n)| n.level).collect();
        assert_eq!(levels, vec![0, 1, 2, 1, 0]);
    }

    #[test]
    fn test_chapter_for_strips_fragment() {
        let chapters = vec![
            chapter("c1", "OEBPS/text/ch1.xhtml", 0),
            chapter("c2", "OEBPS/text/ch2.xhtml", 1),
        ];
        let mut toc = TocTree::new();
        let idx = toc.push_root("Two", "OEBPS/text/ch2.xhtml#sec");
        let node = toc.node(idx).unwrap();
        assert_eq!(toc.chapter_for(node, &chapters).unwrap().id, "c2");
    }

    #[test]
    fn test_chapter_for_falls_back_to_file_name() {
        let chapters = vec![chapter("c1", "OEBPS/text/ch1.xhtml", 0)];
        let mut toc = TocTree::new();
        let idx = toc.push_root("One", "text/ch1.xhtml");
        let node = toc.node(idx).unwrap();
        assert_eq!(toc.chapter_for(node, &chapters).unwrap().id, "c1");

        let missing = toc.push_root("Missing", "OEBPS/text/none.xhtml");
        assert!(toc.chapter_for(toc.node(missing).unwrap(), &chapters).is_none());
    }

    #[test]
    fn test_sync_status_lifecycle() {
        let mut status = SyncStatus::pending("book-1");
        assert_eq!(status.status, SyncState::Pending);

        status.mark_syncing();
        assert_eq!(status.status, SyncState::Syncing);

        status.mark_error("network down");
        assert_eq!(status.status, SyncState::Error);
        assert_eq!(status.error.as_deref(), Some("network down"));

        status.reset_pending();
        assert_eq!(status.status, SyncState::Pending);
        assert!(status.error.is_none());

        status.mark_synced(9, 10, vec!["c10".to_string()]);
        assert_eq!(status.status, SyncState::Synced);
        assert!(status.synced_at.is_some());
        assert_eq!(status.failed_chapters, vec!["c10".to_string()]);
    }

    #[test]
    fn test_history_entry_builder_defaults() {
        let entry = ReadingHistoryEntry::builder()
            .book_id("b1")
            .title("Title")
            .author("Author")
            .build();
        assert_eq!(entry.progress, 0.0);
        assert!(entry.chapter_id.is_none());
    }

    #[test]
    fn test_split_fragment() {
        assert_eq!(split_fragment("a.xhtml#x"), ("a.xhtml", Some("x")));
        assert_eq!(split_fragment("a.xhtml#"), ("a.xhtml", None));
        assert_eq!(split_fragment("a.xhtml"), ("a.xhtml", None));
    }
}

//! Container pointer and package document (OPF) parsing.

use std::collections::HashMap;

use tracing::debug;

use super::dom::{DomElement, normalize_entities, parse_document};
use super::error::{EpubError, Result};
use super::paths::{base_dir, resolve_href};
use crate::models::{BookMetadata, Creator};

pub const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";
pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
pub const CSS_MEDIA_TYPE: &str = "text/css";

/// Manifest entry with its href already resolved to an archive path.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    pub fn is_xhtml(&self) -> bool {
        self.media_type == XHTML_MEDIA_TYPE || self.media_type == "text/html"
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|prop| prop == name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpineItem {
    pub idref: String,
    pub linear: bool,
    pub index: usize,
}

/// Parsed package document.
#[derive(Debug, Clone)]
pub struct Package {
    pub path: String,
    /// Directory of the package document; base for every manifest href.
    pub dir: String,
    pub metadata: BookMetadata,
    pub manifest: HashMap<String, ManifestItem>,
    /// Manifest ids in document order.
    pub manifest_order: Vec<String>,
    pub spine: Vec<SpineItem>,
    /// Manifest id of the legacy NCX, from `<spine toc="...">`.
    pub toc_id: Option<String>,
}

impl Package {
    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.get(id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ManifestItem> {
        self.manifest_order.iter().filter_map(|id| self.manifest.get(id))
    }

    /// The modern navigation document, if the manifest flags one.
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.items().find(|item| item.has_property("nav"))
    }

    /// The legacy NCX, only when the spine references an existing item.
    pub fn ncx_item(&self) -> Option<&ManifestItem> {
        self.toc_id.as_deref().and_then(|id| self.manifest.get(id))
    }
}

/// Extract the package document path from `META-INF/container.xml`.
pub fn find_rootfile(container_xml: &str) -> Result<String> {
    let doc = parse_document("META-INF/container.xml", container_xml)
        .map_err(|e| EpubError::ArchiveStructure(e.to_string()))?;
    let root = doc.root_element();
    let rootfiles = root.elements_by_tag("rootfile");

    let chosen = rootfiles
        .iter()
        .find(|rf| rf.attr("media-type") == Some(PACKAGE_MEDIA_TYPE))
        .or_else(|| rootfiles.first())
        .ok_or_else(|| EpubError::ArchiveStructure("container has no rootfile".to_string()))?;

    chosen
        .attr("full-path")
        .map(|p| p.trim_start_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| EpubError::ArchiveStructure("rootfile has no full-path".to_string()))
}

/// Parse the package document at `path`. `fallback_identifier` is used when
/// the package declares no `dc:identifier`.
pub fn parse_package(path: &str, text: &str, fallback_identifier: &str) -> Result<Package> {
    let text = normalize_entities(text);
    let doc = parse_document(path, &text).map_err(|e| EpubError::ArchiveStructure(e.to_string()))?;
    let package = doc.root_element();
    if package.local_name() != "package" {
        return Err(EpubError::ArchiveStructure(format!(
            "{path}: root element is <{}>, expected <package>",
            package.local_name()
        )));
    }

    let dir = base_dir(path);

    let manifest_node = package
        .first_by_tag("manifest")
        .ok_or_else(|| EpubError::ArchiveStructure(format!("{path}: missing <manifest>")))?;
    let spine_node = package
        .first_by_tag("spine")
        .ok_or_else(|| EpubError::ArchiveStructure(format!("{path}: missing <spine>")))?;

    let mut manifest = HashMap::new();
    let mut manifest_order = Vec::new();
    for item in manifest_node.elements_by_tag("item") {
        let (Some(id), Some(href)) = (item.attr("id"), item.attr("href")) else {
            continue;
        };
        let entry = ManifestItem {
            id: id.to_string(),
            href: resolve_href(href, &dir),
            media_type: item.attr("media-type").unwrap_or_default().to_string(),
            properties: item.attr("properties").map(str::to_string),
        };
        if manifest.insert(id.to_string(), entry).is_none() {
            manifest_order.push(id.to_string());
        }
    }

    let spine: Vec<SpineItem> = spine_node
        .elements_by_tag("itemref")
        .into_iter()
        .filter_map(|node| {
            let idref = node.attr("idref")?.to_string();
            Some((idref, node.attr("linear") != Some("no")))
        })
        .enumerate()
        .map(|(index, (idref, linear))| SpineItem {
            idref,
            linear,
            index,
        })
        .collect();

    let toc_id = spine_node
        .attr("toc")
        .map(str::to_string)
        .filter(|id| !id.is_empty());

    let mut metadata = parse_metadata(package, fallback_identifier);
    metadata.cover_href = find_cover(package, &manifest, &manifest_order);

    debug!(
        path,
        manifest = manifest.len(),
        spine = spine.len(),
        toc = ?toc_id,
        "Parsed package document"
    );

    Ok(Package {
        path: path.to_string(),
        dir,
        metadata,
        manifest,
        manifest_order,
        spine,
        toc_id,
    })
}

fn parse_metadata<E: DomElement>(package: E, fallback_identifier: &str) -> BookMetadata {
    let mut metadata = BookMetadata::with_defaults(fallback_identifier);
    let Some(meta) = package.first_by_tag("metadata") else {
        return metadata;
    };

    let first_text = |tag: &str| -> Option<String> {
        meta.elements_by_tag(tag)
            .into_iter()
            .map(|n| n.text_content().trim().to_string())
            .find(|s| !s.is_empty())
    };

    if let Some(title) = first_text("title") {
        metadata.title = title;
    }

    let creators: Vec<Creator> = meta
        .elements_by_tag("creator")
        .into_iter()
        .filter_map(|node| {
            let name = node.text_content().trim().to_string();
            (!name.is_empty()).then(|| Creator {
                name,
                role: node.attr("role").map(str::to_string),
            })
        })
        .collect();
    if !creators.is_empty() {
        metadata.creators = creators;
    }

    if let Some(language) = first_text("language") {
        metadata.language = language;
    }

    // Prefer the identifier named by <package unique-identifier="...">.
    let unique_id = package.attr("unique-identifier");
    let identifiers = meta.elements_by_tag("identifier");
    let identifier = identifiers
        .iter()
        .find(|n| unique_id.is_some() && n.attr("id") == unique_id)
        .or_else(|| identifiers.first())
        .map(|n| n.text_content().trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(identifier) = identifier {
        metadata.identifier = identifier;
    }

    metadata.publisher = first_text("publisher");
    metadata.description = first_text("description");
    metadata.date = first_text("date");
    metadata.rights = first_text("rights");
    metadata
}

fn find_cover<E: DomElement>(
    package: E,
    manifest: &HashMap<String, ManifestItem>,
    order: &[String],
) -> Option<String> {
    if let Some(item) = order
        .iter()
        .filter_map(|id| manifest.get(id))
        .find(|item| item.has_property("cover-image"))
    {
        return Some(item.href.clone());
    }

    package
        .elements_by_tag("meta")
        .into_iter()
        .find(|m| m.attr("name") == Some("cover"))
        .and_then(|m| m.attr("content").map(str::to_string))
        .and_then(|id| manifest.get(&id))
        .map(|item| item.href.clone())
}

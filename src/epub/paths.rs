//! Archive path resolution.
//!
//! All hrefs found in the package document, navigation documents and chapter
//! markup go through [`resolve_href`] so that manifest items, chapters and
//! resources share one key space: the path of the entry inside the ZIP.

use std::borrow::Cow;

/// Resolve `href` against `base_dir` (a directory ending in `/`, or empty for
/// the archive root).
///
/// `href` is a URI reference without its fragment, so it is percent-decoded
/// first: `chapter%201.xhtml` names the entry `chapter 1.xhtml`.
///
/// - `/x.png` drops the leading slash and ignores the base.
/// - each leading `../` pops one directory off the base.
/// - anything else is appended to the base.
pub fn resolve_href(href: &str, base_dir: &str) -> String {
    let decoded = urlencoding::decode(href).unwrap_or(Cow::Borrowed(href));
    let href = decoded.as_ref();

    if let Some(absolute) = href.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut dirs: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    let mut rest = href;
    loop {
        if let Some(tail) = rest.strip_prefix("../") {
            dirs.pop();
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("./") {
            rest = tail;
        } else {
            break;
        }
    }

    if dirs.is_empty() {
        rest.to_string()
    } else {
        format!("{}/{}", dirs.join("/"), rest)
    }
}

/// Directory part of an archive path, with trailing slash; empty at the root.
pub fn base_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/"),
        None => String::new(),
    }
}

/// True for hrefs that point outside the archive.
pub fn is_external(href: &str) -> bool {
    let lower = href.trim_start().to_ascii_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
        || lower.starts_with("mailto:")
        || lower.starts_with("//")
}

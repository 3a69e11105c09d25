//! Stand-alone chapter documents.

use std::collections::BTreeMap;

use lol_html::errors::AttributeNameError;
use lol_html::html_content::Element;
use lol_html::{RewriteStrSettings, element, rewrite_str};
use tracing::warn;

use crate::epub::paths::{base_dir, is_external, resolve_href};
use crate::models::{BookMetadata, Chapter, Resource};

/// Path prefix under which rewritten resource references are served,
/// relative to the chapter document.
pub const RESOURCE_PREFIX: &str = "resources/";

/// Stylesheet name every chapter links to.
pub const STYLESHEET_NAME: &str = "styles.css";

/// Marks images that still fail to load so the reader can style them.
const FIXUP_SCRIPT: &str = r#"<script>
document.addEventListener('DOMContentLoaded', function () {
  document.querySelectorAll('img').forEach(function (img) {
    img.addEventListener('error', function () {
      img.classList.add('epubvault-missing');
      img.setAttribute('alt', img.getAttribute('alt') || 'Image unavailable');
    });
  });
});
</script>"#;

/// File name of a chapter's rendered document.
pub fn chapter_file_name(chapter_id: &str) -> String {
    format!("chapter_{chapter_id}.html")
}

pub fn render_chapter(
    metadata: &BookMetadata,
    chapter: &Chapter,
    resources: &BTreeMap<String, Resource>,
) -> String {
    let body = rewrite_resources(&chapter.html, &chapter.href, resources);
    let title = html_escape::encode_text(&chapter.title);
    let lang = html_escape::encode_double_quoted_attribute(&metadata.language);

    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet" href="{STYLESHEET_NAME}">
</head>
<body>
<article class="chapter" data-chapter-id="{id}" data-order="{order}">
{body}
</article>
{FIXUP_SCRIPT}
</body>
</html>
"#,
        id = html_escape::encode_double_quoted_attribute(&chapter.id),
        order = chapter.order,
    )
}

/// Point image references at stored resources and drop stylesheet links.
///
/// Handles `img[src]` and SVG `image[href|xlink:href]`. A reference is only
/// rewritten when it resolves to a resource of the book; external and
/// `data:` URLs are left alone. Markup the rewriter cannot process is
/// returned as is.
pub fn rewrite_resources(
    html: &str,
    chapter_href: &str,
    resources: &BTreeMap<String, Resource>,
) -> String {
    let base = base_dir(chapter_href);

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("img[src]", |el| {
                    point_at_resource(el, "src", &base, resources)?;
                    Ok(())
                }),
                element!("image", |el| {
                    for attr in ["href", "xlink:href"] {
                        point_at_resource(el, attr, &base, resources)?;
                    }
                    Ok(())
                }),
                element!("link[rel]", |el| {
                    let stylesheet = el.get_attribute("rel").is_some_and(|rel| {
                        rel.split_ascii_whitespace()
                            .any(|token| token.eq_ignore_ascii_case("stylesheet"))
                    });
                    if stylesheet {
                        el.remove();
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    );

    match rewritten {
        Ok(out) => out,
        Err(e) => {
            warn!(chapter_href, error = %e, "Resource rewriting failed, keeping markup");
            html.to_string()
        }
    }
}

fn point_at_resource(
    el: &mut Element<'_, '_>,
    attr: &str,
    base: &str,
    resources: &BTreeMap<String, Resource>,
) -> Result<(), AttributeNameError> {
    let Some(value) = el.get_attribute(attr) else {
        return Ok(());
    };
    if let Some(path) = resolve_resource(&value, base, resources) {
        el.set_attribute(attr, &resource_url(path))?;
    }
    Ok(())
}

/// `resources/<archive-path>` with each path segment percent-encoded.
fn resource_url(path: &str) -> String {
    let encoded: Vec<_> = path.split('/').map(urlencoding::encode).collect();
    format!("{RESOURCE_PREFIX}{}", encoded.join("/"))
}

fn resolve_resource<'r>(
    value: &str,
    base: &str,
    resources: &'r BTreeMap<String, Resource>,
) -> Option<&'r str> {
    let value = value.trim();
    if value.is_empty() || is_external(value) || value.starts_with(RESOURCE_PREFIX) {
        return None;
    }
    let path = value.split(['#', '?']).next().unwrap_or(value);
    resources
        .get_key_value(&resolve_href(path, base))
        .map(|(key, _)| key.as_str())
}

use std::fmt::Write;

use super::chapter::{STYLESHEET_NAME, chapter_file_name};
use crate::models::{ProcessedBook, split_fragment};

/// Index page: book heading plus the whole TOC as nested lists of links to
/// chapter documents. Entries that do not resolve to a chapter are rendered
/// as plain labels.
pub fn render_index(book: &ProcessedBook) -> String {
    let mut toc = String::new();
    write_list(book, book.toc.roots(), &mut toc);

    let title = html_escape::encode_text(&book.metadata.title);
    let author = html_escape::encode_text(&book.metadata.author_line()).into_owned();
    let lang = html_escape::encode_double_quoted_attribute(&book.metadata.language);

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
<header class="book-header">
<h1>{title}</h1>
<p class="book-author">{author}</p>
</header>
<nav class="toc">
<h2>Table of Contents</h2>
{toc}</nav>
</body>
</html>
"#
    )
}

fn write_list(book: &ProcessedBook, indices: &[usize], out: &mut String) {
    if indices.is_empty() {
        return;
    }
    out.push_str("<ol>\n");
    for &idx in indices {
        let Some(node) = book.toc.node(idx) else {
            continue;
        };
        let label = html_escape::encode_text(&node.title);
        out.push_str("<li>");
        match book.toc.chapter_for(node, &book.chapters) {
            Some(chapter) => {
                let mut target = chapter_file_name(&chapter.id);
                if let (_, Some(fragment)) = split_fragment(&node.href) {
                    let _ = write!(target, "#{fragment}");
                }
                let _ = write!(
                    out,
                    "<a href=\"{}\">{label}</a>",
                    html_escape::encode_double_quoted_attribute(&target)
                );
            }
            None => {
                let _ = write!(out, "<span>{label}</span>");
            }
        }
        if !node.children.is_empty() {
            out.push('\n');
            write_list(book, &node.children, out);
        }
        out.push_str("</li>\n");
    }
    out.push_str("</ol>\n");
}

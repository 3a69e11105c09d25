/// Reader defaults appended after the book's own stylesheets.
pub const READER_DEFAULTS: &str = r#"/* reader defaults */
body {
  margin: 0 auto;
  max-width: 42em;
  padding: 1em 1.25em;
  line-height: 1.6;
  font-family: Georgia, "Times New Roman", serif;
  color: #1d1d1f;
  background: #fffdf8;
}

img, svg {
  max-width: 100%;
  height: auto;
}

img.epubvault-missing {
  min-width: 4em;
  min-height: 2em;
  outline: 1px dashed #999;
}

nav.toc ol {
  list-style: none;
  padding-left: 1.25em;
}

@media (prefers-color-scheme: dark) {
  body {
    color: #e6e6e6;
    background: #161616;
  }
  a {
    color: #8ab4f8;
  }
  img {
    filter: brightness(0.9);
  }
}

@media print {
  body {
    max-width: none;
    color: #000;
    background: #fff;
  }
  nav.toc, script {
    display: none;
  }
  article.chapter {
    page-break-after: always;
  }
}
"#;

/// The book's stylesheets in manifest order followed by [`READER_DEFAULTS`].
pub fn combined_css(book_css: &[String]) -> String {
    let mut out = String::new();
    for sheet in book_css {
        out.push_str(sheet.trim_end());
        out.push_str("\n\n");
    }
    out.push_str(READER_DEFAULTS);
    out
}

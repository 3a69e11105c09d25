//! In-memory EPUB builder used by tests and the `demo` command.

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;

/// Which navigation documents the generated archive carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TocStyle {
    #[default]
    Ncx,
    Nav,
    Both,
    None,
}

#[derive(Debug, Clone)]
enum FixtureChapter {
    Generated { title: String, body: String },
    Raw(String),
    /// Listed in manifest and spine but absent from the archive.
    Missing { title: String },
}

#[derive(Debug, Clone)]
pub struct EpubFixture {
    title: String,
    authors: Vec<String>,
    language: String,
    identifier: Option<String>,
    chapters: Vec<FixtureChapter>,
    toc_style: TocStyle,
    stylesheet: Option<String>,
    images: Vec<(String, Vec<u8>)>,
    container: bool,
    /// Chapter entries are `OEBPS/text/<stem><n>.xhtml`.
    file_stem: String,
}

impl EpubFixture {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            authors: Vec::new(),
            language: "en".to_string(),
            identifier: None,
            chapters: Vec::new(),
            toc_style: TocStyle::default(),
            stylesheet: None,
            images: Vec::new(),
            container: true,
            file_stem: "ch".to_string(),
        }
    }

    /// A small three-chapter book with a stylesheet and one image.
    pub fn sample() -> Self {
        Self::new("The Sample Voyage")
            .author("A. Writer")
            .identifier("urn:epubvault:sample")
            .chapter(
                "Departure",
                "<p>The ship left at dawn.</p><p><img src=\"../images/map.png\" alt=\"map\"/></p>",
            )
            .chapter("At Sea", "<p>Nothing but water for days.</p>")
            .chapter("Landfall", "<p>An island, at last.</p>")
            .stylesheet("p { text-indent: 1.5em; }")
            .image("map.png", b"\x89PNG\r\n\x1a\nsample")
    }

    pub fn author(mut self, name: impl Into<String>) -> Self {
        self.authors.push(name.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Add a chapter whose document title and `<h1>` are `title`.
    pub fn chapter(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.chapters.push(FixtureChapter::Generated {
            title: title.into(),
            body: body.into(),
        });
        self
    }

    /// Add a chapter with fully caller-supplied markup.
    pub fn raw_chapter(mut self, markup: impl Into<String>) -> Self {
        self.chapters.push(FixtureChapter::Raw(markup.into()));
        self
    }

    pub fn missing_chapter(mut self, title: impl Into<String>) -> Self {
        self.chapters.push(FixtureChapter::Missing {
            title: title.into(),
        });
        self
    }

    pub fn toc_style(mut self, style: TocStyle) -> Self {
        self.toc_style = style;
        self
    }

    pub fn stylesheet(mut self, css: impl Into<String>) -> Self {
        self.stylesheet = Some(css.into());
        self
    }

    /// Add an image stored under `OEBPS/images/<name>`.
    pub fn image(mut self, name: impl Into<String>, data: &[u8]) -> Self {
        self.images.push((name.into(), data.to_vec()));
        self
    }

    /// Name chapter files `<stem><n>.xhtml`. Hrefs pointing at them are
    /// percent-encoded, so a stem with spaces or brackets exercises URI
    /// decoding.
    pub fn file_stem(mut self, stem: impl Into<String>) -> Self {
        self.file_stem = stem.into();
        self
    }

    /// Href of chapter `n` (1-based) relative to `OEBPS/`.
    fn chapter_href(&self, n: usize) -> String {
        format!("text/{}{n}.xhtml", urlencoding::encode(&self.file_stem))
    }

    /// Omit `META-INF/container.xml`.
    pub fn without_container(mut self) -> Self {
        self.container = false;
        self
    }

    /// Build the archive.
    ///
    /// # Panics
    ///
    /// Only if writing to an in-memory buffer fails, which it does not.
    pub fn build(&self) -> Vec<u8> {
        self.try_build().expect("in-memory zip write")
    }

    pub fn try_build(&self) -> ZipResult<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        if self.container {
            zip.start_file("META-INF/container.xml", deflated)?;
            zip.write_all(CONTAINER_XML.as_bytes())?;
        }

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(self.package_document().as_bytes())?;

        if matches!(self.toc_style, TocStyle::Ncx | TocStyle::Both) {
            zip.start_file("OEBPS/toc.ncx", deflated)?;
            zip.write_all(self.ncx_document().as_bytes())?;
        }
        if matches!(self.toc_style, TocStyle::Nav | TocStyle::Both) {
            zip.start_file("OEBPS/nav.xhtml", deflated)?;
            zip.write_all(self.nav_document().as_bytes())?;
        }

        for (i, chapter) in self.chapters.iter().enumerate() {
            let markup = match chapter {
                FixtureChapter::Generated { title, body } => self.chapter_document(title, body),
                FixtureChapter::Raw(markup) => markup.clone(),
                FixtureChapter::Missing { .. } => continue,
            };
            zip.start_file(format!("OEBPS/text/{}{}.xhtml", self.file_stem, i + 1), deflated)?;
            zip.write_all(markup.as_bytes())?;
        }

        if let Some(css) = &self.stylesheet {
            zip.start_file("OEBPS/styles/book.css", deflated)?;
            zip.write_all(css.as_bytes())?;
        }

        for (name, data) in &self.images {
            zip.start_file(format!("OEBPS/images/{name}"), stored)?;
            zip.write_all(data)?;
        }

        Ok(zip.finish()?.into_inner())
    }

    fn toc_title(&self, index: usize) -> String {
        match &self.chapters[index] {
            FixtureChapter::Generated { title, .. } | FixtureChapter::Missing { title } => {
                title.clone()
            }
            FixtureChapter::Raw(_) => format!("Section {}", index + 1),
        }
    }

    fn package_document(&self) -> String {
        let esc = |s: &str| html_escape::encode_text(s).into_owned();

        let mut metadata = String::new();
        if let Some(id) = &self.identifier {
            metadata.push_str(&format!(
                "    <dc:identifier id=\"uid\">{}</dc:identifier>\n",
                esc(id)
            ));
        }
        metadata.push_str(&format!("    <dc:title>{}</dc:title>\n", esc(&self.title)));
        for author in &self.authors {
            metadata.push_str(&format!("    <dc:creator>{}</dc:creator>\n", esc(author)));
        }
        metadata.push_str(&format!(
            "    <dc:language>{}</dc:language>\n",
            esc(&self.language)
        ));

        let mut manifest = String::new();
        let mut spine = String::new();
        for i in 1..=self.chapters.len() {
            manifest.push_str(&format!(
                "    <item id=\"ch{i}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                esc(&self.chapter_href(i))
            ));
            spine.push_str(&format!("    <itemref idref=\"ch{i}\"/>\n"));
        }
        if matches!(self.toc_style, TocStyle::Ncx | TocStyle::Both) {
            manifest.push_str(
                "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
            );
        }
        if matches!(self.toc_style, TocStyle::Nav | TocStyle::Both) {
            manifest.push_str(
                "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
            );
        }
        if self.stylesheet.is_some() {
            manifest.push_str(
                "    <item id=\"css\" href=\"styles/book.css\" media-type=\"text/css\"/>\n",
            );
        }
        for (i, (name, _)) in self.images.iter().enumerate() {
            let media_type = mime_guess::from_path(name).first_or_octet_stream();
            manifest.push_str(&format!(
                "    <item id=\"img{i}\" href=\"images/{}\" media-type=\"{}\"/>\n",
                esc(&urlencoding::encode(name)),
                media_type.essence_str()
            ));
        }

        let spine_toc = if matches!(self.toc_style, TocStyle::Ncx | TocStyle::Both) {
            " toc=\"ncx\""
        } else {
            ""
        };
        let unique = if self.identifier.is_some() {
            " unique-identifier=\"uid\""
        } else {
            ""
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0"{unique}>
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
{metadata}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine{spine_toc}>
{spine}  </spine>
</package>
"#
        )
    }

    fn ncx_document(&self) -> String {
        let mut points = String::new();
        for i in 0..self.chapters.len() {
            points.push_str(&format!(
                "    <navPoint id=\"np{n}\" playOrder=\"{n}\">\n      <navLabel><text>NCX {title}</text></navLabel>\n      <content src=\"{href}\"/>\n    </navPoint>\n",
                n = i + 1,
                href = self.chapter_href(i + 1),
                title = html_escape::encode_text(&self.toc_title(i)),
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <docTitle><text>{}</text></docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
            html_escape::encode_text(&self.title)
        )
    }

    fn nav_document(&self) -> String {
        let mut items = String::new();
        for i in 0..self.chapters.len() {
            items.push_str(&format!(
                "      <li><a href=\"{}\">Nav {}</a></li>\n",
                self.chapter_href(i + 1),
                html_escape::encode_text(&self.toc_title(i)),
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
  <nav epub:type="toc">
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#
        )
    }

    fn chapter_document(&self, title: &str, body: &str) -> String {
        let title = html_escape::encode_text(title);
        let link = if self.stylesheet.is_some() {
            "\n<link rel=\"stylesheet\" type=\"text/css\" href=\"../styles/book.css\"/>"
        } else {
            ""
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{title}</title>{link}</head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>
"#
        )
    }
}

const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

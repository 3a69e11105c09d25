use std::io::{Cursor, Read};

use zip::ZipArchive;
use zip::result::ZipError;

use super::error::{EpubError, Result};

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Random access to the entries of an EPUB (ZIP) archive held in memory.
pub struct EpubArchive<'a> {
    zip: ZipArchive<Cursor<&'a [u8]>>,
    archive_len: usize,
}

impl<'a> EpubArchive<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self> {
        let zip = ZipArchive::new(Cursor::new(data)).map_err(|e| match e {
            e @ (ZipError::InvalidArchive(_) | ZipError::UnsupportedArchive(_)) => {
                EpubError::ArchiveStructure(format!("not a ZIP archive: {e}"))
            }
            other => EpubError::Zip(other),
        })?;
        Ok(Self {
            zip,
            archive_len: data.len(),
        })
    }

    /// Read an entry as bytes. A missing entry is [`EpubError::ResourceNotFound`].
    pub fn read_bytes(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut file = match self.zip.by_name(path) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(EpubError::ResourceNotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::with_capacity(capacity_hint(file.size(), self.archive_len));
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read an entry as text, replacing invalid UTF-8 and stripping a BOM.
    pub fn read_text(&mut self, path: &str) -> Result<String> {
        let bytes = self.read_bytes(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.zip.index_for_name(path).is_some()
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.zip.file_names().map(str::to_string).collect()
    }

    /// Read the container pointer file. Its absence is fatal.
    pub fn read_container(&mut self) -> Result<String> {
        self.read_text(CONTAINER_PATH).map_err(|e| match e {
            EpubError::ResourceNotFound(_) => {
                EpubError::ArchiveStructure(format!("missing {CONTAINER_PATH}"))
            }
            other => other,
        })
    }
}

/// Preallocation for an entry. The declared size comes from the archive and
/// is untrusted; never reserve more than the archive itself occupies.
fn capacity_hint(declared: u64, archive_len: usize) -> usize {
    usize::try_from(declared).map_or(archive_len, |size| size.min(archive_len))
}

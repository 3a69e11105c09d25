use thiserror::Error;

#[derive(Debug, Error)]
pub enum EpubError {
    /// Malformed or missing required archive entries. Aborts the whole parse.
    #[error("Invalid archive structure: {0}")]
    ArchiveStructure(String),

    /// A referenced file is absent from the archive. Scoped to one item.
    #[error("Resource not found in archive: {0}")]
    ResourceNotFound(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parse error in {path}: {message}")]
    Xml { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EpubError {
    /// Errors that skip a single chapter or resource instead of aborting.
    pub fn is_scoped(&self) -> bool {
        matches!(self, EpubError::ResourceNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, EpubError>;

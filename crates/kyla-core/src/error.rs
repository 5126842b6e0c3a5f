use std::io;
use std::path::PathBuf;

use crate::digest::Digest;

/// Faults raised by the repository engine. Validation faults are not in
/// here: they are reported through the validation callback and never
/// unwind an operation.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{} is not a repository", path.display())]
    NotARepository { path: PathBuf },
    #[error("catalog is corrupt: {0}")]
    CatalogCorrupt(String),
    #[error("content object {digest} is not present")]
    UnknownObject { digest: Digest },
    #[error("stored digest is {found} bytes wide, expected 32")]
    DigestLengthMismatch { found: usize },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bad package file: {0}")]
    PackageFormat(String),
    #[error("this repository layout does not support {operation}")]
    UnsupportedOperation { operation: &'static str },
    #[error("operation cancelled")]
    Cancelled,
}

impl RepositoryError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

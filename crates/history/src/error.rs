use crate::codec::Corruption;
use std::path::PathBuf;

/// Represents all possible errors that can occur in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream has a bad header, a malformed record or an impossible
    /// timestamp. The server owning it cannot be tracked any more.
    #[error("Corrupt stream {path}: {reason}")]
    CorruptStream {
        path: PathBuf,
        #[source]
        reason: Corruption,
    },

    /// A file could not be opened, written or renamed.
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination of an archive or unarchive rename already exists.
    #[error("Archive conflict, {path} already exists")]
    ArchiveConflict { path: PathBuf },

    /// The path cannot be used as a glob pattern.
    #[error("Path is invalid: {0}")]
    InvalidPath(PathBuf),

    /// Error occurred while listing stream files.
    #[error("Failed to list streams: {0}")]
    Glob(#[from] glob::GlobError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>) -> impl FnOnce(Corruption) -> Self {
        let path = path.into();
        move |reason| Self::CorruptStream { path, reason }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptStream { .. })
    }
}

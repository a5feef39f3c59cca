//! Error type for durable store operations

use std::path::PathBuf;

/// Error from reading or writing a durable file.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem failure on `path`
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// File exists but is not valid JSON of the expected type
    Parse { path: PathBuf, message: String },
    /// File parsed but failed the structural shape check
    Validation { path: PathBuf, message: String },
    /// Value could not be serialized
    Encode(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "IO on {}: {source}", path.display()),
            Self::Parse { path, message } => {
                write!(f, "cannot parse {}: {message}", path.display())
            }
            Self::Validation { path, message } => {
                write!(f, "invalid contents in {}: {message}", path.display())
            }
            Self::Encode(message) => write!(f, "cannot encode record: {message}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The file simply does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// The file was read but its contents are not a valid document.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Validation { .. })
    }

    /// Disk full, permission denied, read-only filesystem.
    ///
    /// Retrying the same write will not help; the caller should stop.
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::StorageFull
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::ReadOnlyFilesystem
            ),
            _ => false,
        }
    }
}

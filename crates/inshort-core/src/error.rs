//! Per-item assembly errors

use crate::http::FetchError;

/// Why an item produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    /// Catalog item lacks the fields its key is derived from
    MissingKey,
    /// The mandatory primary fetch failed
    Primary(FetchError),
    /// Shutdown was requested while waiting for quota
    Interrupted,
}

impl std::fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingKey => write!(f, "item has no identifying key"),
            Self::Primary(e) => write!(f, "primary fetch failed: {e}"),
            Self::Interrupted => write!(f, "interrupted while waiting for quota"),
        }
    }
}

impl std::error::Error for AssemblyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Primary(e) => Some(e),
            Self::MissingKey | Self::Interrupted => None,
        }
    }
}

impl AssemblyError {
    /// Worth another attempt for the same item
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MissingKey | Self::Interrupted => false,
            Self::Primary(e) => e.is_retryable(),
        }
    }
}

impl From<FetchError> for AssemblyError {
    fn from(e: FetchError) -> Self {
        Self::Primary(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_follows_primary_error() {
        let transient = AssemblyError::Primary(FetchError::Http {
            status: Some(502),
            message: "bad gateway".into(),
        });
        let gone = AssemblyError::Primary(FetchError::Http {
            status: Some(404),
            message: "not found".into(),
        });
        assert!(transient.is_retryable());
        assert!(!gone.is_retryable());
        assert!(!AssemblyError::MissingKey.is_retryable());
        assert!(!AssemblyError::Interrupted.is_retryable());
    }

    #[test]
    fn display_wraps_fetch_error() {
        let e = AssemblyError::from(FetchError::Malformed("EOF".into()));
        assert_eq!(e.to_string(), "primary fetch failed: malformed response: EOF");
    }
}

use std::io::ErrorKind;
use std::path::PathBuf;

/// Disk-layer failures, with the path that produced them.
#[derive(Debug)]
pub enum StoreError {
    EnsureDir {
        path: PathBuf,
        source: std::io::Error,
    },
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn source_kind(&self) -> ErrorKind {
        match self {
            Self::EnsureDir { source, .. }
            | Self::ReadDir { source, .. }
            | Self::ReadFile { source, .. }
            | Self::WriteFile { source, .. } => source.kind(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnsureDir { path, source } => {
                write!(
                    f,
                    "failed to ensure directory '{}': {source}",
                    path.display()
                )
            }
            Self::ReadDir { path, source } => {
                write!(f, "failed to read directory '{}': {source}", path.display())
            }
            Self::ReadFile { path, source } => {
                write!(f, "failed to read file '{}': {source}", path.display())
            }
            Self::WriteFile { path, source } => {
                write!(f, "failed to write file '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::EnsureDir { source, .. }
            | Self::ReadDir { source, .. }
            | Self::ReadFile { source, .. }
            | Self::WriteFile { source, .. } => Some(source),
        }
    }
}

/// Why fetching or accepting one object failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The transport gave up waiting for the interest.
    Timeout,
    /// Wire decoding failed or the decoded entity was inconsistent.
    Decode(String),
    /// The signature did not verify under the key chain.
    SignatureInvalid,
    /// The implicit digest did not match the name that requested the object.
    DigestMismatch,
    /// The object's name is not listed by any known parent catalog.
    NotInCatalog,
    /// The disk is out of space; not retried.
    DiskFull,
    /// Any other I/O failure while persisting; not retried.
    Io(String),
    /// Shutdown abandoned the transaction; never surfaced to callbacks.
    Cancelled,
}

impl FetchError {
    /// Whether the retry ladder applies, or the failure is immediately final.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Decode(_)
                | Self::SignatureInvalid
                | Self::DigestMismatch
                | Self::NotInCatalog
        )
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "interest timed out"),
            Self::Decode(msg) => write!(f, "decode failed: {msg}"),
            Self::SignatureInvalid => write!(f, "signature did not verify"),
            Self::DigestMismatch => write!(f, "implicit digest mismatch"),
            Self::NotInCatalog => write!(f, "name not listed in any known catalog"),
            Self::DiskFull => write!(f, "disk full"),
            Self::Io(msg) => write!(f, "i/o failure: {msg}"),
            Self::Cancelled => write!(f, "cancelled by shutdown"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<StoreError> for FetchError {
    fn from(value: StoreError) -> Self {
        match value.source_kind() {
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded => Self::DiskFull,
            _ => Self::Io(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_full_is_classified_from_io_kind() {
        let err = StoreError::WriteFile {
            path: PathBuf::from("/x"),
            source: std::io::Error::new(ErrorKind::StorageFull, "full"),
        };
        assert_eq!(FetchError::from(err), FetchError::DiskFull);

        let err = StoreError::WriteFile {
            path: PathBuf::from("/x"),
            source: std::io::Error::new(ErrorKind::PermissionDenied, "nope"),
        };
        assert!(matches!(FetchError::from(err), FetchError::Io(_)));
    }

    #[test]
    fn retriability_follows_recovery_policy() {
        assert!(FetchError::Timeout.is_retriable());
        assert!(FetchError::NotInCatalog.is_retriable());
        assert!(!FetchError::DiskFull.is_retriable());
        assert!(!FetchError::Io("x".into()).is_retriable());
        assert!(!FetchError::Cancelled.is_retriable());
    }
}

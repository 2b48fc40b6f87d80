use std::io;

use thiserror::Error;

/// An error that happens when opening or revalidating a cached resource.
///
/// Only failures of [`ResourceFactory::open`](super::ResourceFactory::open) ever reach callers of
/// [`FileCache::acquire`](super::FileCache::acquire). Errors from the other resource hooks are
/// logged and cause the affected entry to be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The resource does not exist at its location.
    #[error("not found")]
    NotFound,
    /// The resource could not be opened due to missing permissions.
    ///
    /// The attached string contains the underlying error message.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The caller gave up on the open via its cancellation token.
    #[error("cancelled")]
    Cancelled,
    /// The resource was opened successfully, but its contents are invalid in some way.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The resource exists but is of a kind the factory cannot open.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// An unexpected error, details of which have already been logged.
    #[error("internal error")]
    InternalError,
}

impl From<io::Error> for CacheError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            _ => Self::from_std_error(err),
        }
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The outcome of a cache operation, containing either `Ok(T)` or the reason why a resource
/// could not be opened or is otherwise unusable.
pub type CacheContents<T = ()> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_error() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(CacheError::from(err), CacheError::NotFound);

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(
            CacheError::from(err),
            CacheError::PermissionDenied("nope".into())
        );

        let err = io::Error::other("disk on fire");
        assert_eq!(CacheError::from(err), CacheError::InternalError);
    }

    #[test]
    fn test_display() {
        assert_eq!(CacheError::Cancelled.to_string(), "cancelled");
        assert_eq!(
            CacheError::Malformed("bad header".into()).to_string(),
            "malformed: bad header"
        );
    }
}

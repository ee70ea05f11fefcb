//! Error types and the related `Result<T>`

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The ZIP archive contained invalid data per the ZIP format.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(String),

    /// The ZIP archive uses an unsupported feature
    /// (encryption, patch data, multiple disks...)
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// No End of central directory record could be parsed.
    ///
    /// Every candidate signature we found along the way failed to parse;
    /// their errors are kept (last byte of the file first) for diagnostics.
    #[error("Couldn't find End Of Central Directory Record ({} candidates rejected)", attempts.len())]
    EocdNotFound { attempts: Vec<ZipError> },

    /// A record field was given a value it can't hold
    #[error("Field '{field}' can't hold {value}: {reason}")]
    InvalidField {
        field: &'static str,
        value: u64,
        reason: String,
    },

    /// Tried to change an archive opened read-only.
    #[error("Archive was opened read-only")]
    ReadOnly,

    /// An operation was attempted in a state that doesn't allow it.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// An entry wasn't found with the provided name
    #[error("No entry in the archive with the name {0}")]
    NoSuchEntry(String),

    /// Two entries with the same name were handed to the central directory.
    #[error("Duplicate entry {0} in central directory")]
    DuplicateEntry(String),

    /// The file changed on disk while we had it closed.
    #[error("File {0} has been modified by an external application")]
    ExternallyModified(Utf8PathBuf),

    /// Something doesn't fit in the format's fields
    /// (or in the extra field of a local header).
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Compressing an entry failed.
    ///
    /// Shared, since every caller waiting on the same compression sees it.
    #[error("Failed to compress entry")]
    Compression(#[source] Arc<std::io::Error>),

    /// An archive comment we can't write
    #[error("Invalid archive comment: {0}")]
    InvalidComment(String),

    /// Extensions kept invalidating the central directory during an update.
    #[error("Extensions keep resetting the central directory; this is probably a bug")]
    MisbehavingExtension,

    /// Extra text about where an error happened.
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<ZipError>,
    },

    /// A cast from a 64-bit int to a usize failed,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

impl ZipError {
    /// Wraps `self` with some text explaining what we were doing.
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        ZipError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strips any [`ZipError::Context`] layers.
    pub fn root(&self) -> &ZipError {
        match self {
            ZipError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Adds [`ZipError::context`] to results.
pub(crate) trait ResultExt<T> {
    fn context<S: Into<String>, F: FnOnce() -> S>(self, f: F) -> ZipResult<T>;
}

impl<T> ResultExt<T> for ZipResult<T> {
    fn context<S: Into<String>, F: FnOnce() -> S>(self, f: F) -> ZipResult<T> {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn root_skips_context() {
        let e = ZipError::NoSuchEntry("a".into())
            .context("reading a")
            .context("outer");
        assert!(matches!(e.root(), ZipError::NoSuchEntry(n) if n == "a"));
        assert_eq!(e.to_string(), "outer");
    }
}

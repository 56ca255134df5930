//! Error types shared by the backends and the database facade.
//!
//! Runtime failures use [`Error`]; each variant belongs to one
//! [`ErrorKind`] so callers can branch on the category without matching
//! every variant. Mistakes in the configuration are reported through the
//! separate [`ConfigError`] type, raised only while the database is being
//! constructed or rebuilt.

use std::io;

use primitive_types::H256;
use thiserror::Error;

use crate::data::StorageSize;

/// Coarse classification of a runtime [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The active backend lacks the requested capability.
    Unsupported,
    /// A root, node or key is not available.
    NotFound,
    /// The byte store failed to read or write.
    Io,
    /// Persisted data could not be decoded.
    Corrupted,
    /// State history required for recovery is missing or pruned.
    HistoryUnavailable,
    /// The request would break an internal invariant.
    InvariantViolation,
}

/// Trie database errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{op} is not supported by the {backend} backend")]
    Unsupported {
        op: &'static str,
        backend: &'static str,
    },
    #[error("state {0:?} is not available")]
    MissingRoot(H256),
    #[error("missing key {0:02x?}")]
    MissingKey(Vec<u8>),
    #[error("missing trie node {hash:?} (owner {owner:?}, path {path:?})")]
    MissingNode { owner: H256, path: Vec<u8>, hash: H256 },
    #[error("unexpected trie node in {location} layer: want {want:?}, got {got:?} (owner {owner:?}, path {path:?})")]
    UnexpectedNode {
        location: &'static str,
        owner: H256,
        path: Vec<u8>,
        want: H256,
        got: H256,
    },
    #[error("layer {0:?} is stale")]
    StaleLayer(H256),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: bincode::Error,
    },
    #[error("corrupted data: {0}")]
    Corrupted(String),
    #[error("state history unavailable: {0}")]
    HistoryUnavailable(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("cannot cap node cache to {limit}, {size} is still held")]
    CapStalled { limit: StorageSize, size: StorageSize },
    #[error("database is read-only")]
    ReadOnly,
    #[error("node sets belong to different owners: {want:?} != {got:?}")]
    OwnerMismatch { want: H256, got: H256 },
}

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::MissingRoot(_)
            | Error::MissingKey(_)
            | Error::MissingNode { .. }
            | Error::UnexpectedNode { .. }
            | Error::StaleLayer(_) => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::Io,
            Error::Decode { .. } | Error::Corrupted(_) => ErrorKind::Corrupted,
            Error::HistoryUnavailable(_) => ErrorKind::HistoryUnavailable,
            Error::InvariantViolation(_)
            | Error::CapStalled { .. }
            | Error::ReadOnly
            | Error::OwnerMismatch { .. } => ErrorKind::InvariantViolation,
        }
    }

    pub(crate) fn decode(what: &'static str, source: bincode::Error) -> Self {
        Error::Decode { what, source }
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }
}

/// Result type for trie database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal configuration errors.
///
/// These are operator or programmer mistakes, not runtime faults: the
/// caller is expected to abort instead of retrying.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("both 'hash' and 'path' mode are configured")]
    ConflictingSchemes,
    #[error("path scheme does not support the zk trie")]
    ZkPathScheme,
    #[error("failed to open trie database backend: {0}")]
    Open(#[source] Error),
}

use std::path::PathBuf;

use crate::Oid;

/// error type for quire operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("ref already exists: {0}")]
    RefExists(String),

    #[error("invalid ref name: {0}")]
    InvalidRef(String),

    #[error("could not find object {oid} in {path}")]
    ObjectNotFound { oid: Oid, path: PathBuf },

    #[error("path not found in tree: {0}")]
    PathNotFound(String),

    #[error("object {0} is not a commit")]
    NotACommit(Oid),

    #[error("object {0} is not a tree")]
    NotATree(Oid),

    #[error("object {0} is not a blob")]
    NotABlob(Oid),

    #[error("invalid object kind: {0:?}")]
    InvalidObjectKind(String),

    #[error("invalid file mode: {0:?}")]
    InvalidFileMode(String),

    #[error("invalid oid hex: {0:?}")]
    InvalidOidHex(String),

    #[error("malformed object header: {0}")]
    MalformedHeader(String),

    #[error("malformed tree: {0}")]
    MalformedTree(String),

    #[error("malformed commit: {0}")]
    MalformedCommit(String),

    #[error("invalid signature: {0:?}")]
    InvalidSignature(String),

    #[error("write exceeded declared object size of {declared} bytes")]
    SizeExceeded { declared: u64 },

    #[error("attempted to write to closed object writer")]
    Closed,

    #[error("invalid tree entry name: {0}")]
    InvalidEntryName(String),

    #[error("duplicate tree entry name: {0}")]
    DuplicateEntryName(String),

    #[error("path already exists: {0}")]
    PathAlreadyExists(String),

    #[error("path does not exist: {0}")]
    PathDoesNotExist(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("lock contention on repository")]
    LockContention,

    #[error("repository integrity check failed")]
    IntegrityCheckFailed,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// object, path or ref is absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ObjectNotFound { .. } | Error::PathNotFound(_) | Error::RefNotFound(_)
        )
    }

    /// object exists but has a different kind than requested
    pub fn is_wrong_kind(&self) -> bool {
        matches!(
            self,
            Error::NotACommit(_) | Error::NotATree(_) | Error::NotABlob(_)
        )
    }

    /// stored data failed to parse
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::InvalidObjectKind(_)
                | Error::InvalidFileMode(_)
                | Error::InvalidOidHex(_)
                | Error::MalformedHeader(_)
                | Error::MalformedTree(_)
                | Error::MalformedCommit(_)
                | Error::InvalidSignature(_)
                | Error::DuplicateEntryName(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}

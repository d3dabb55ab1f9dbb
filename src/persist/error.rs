use std::path::PathBuf;

use thiserror::Error;

use super::codec::CodecError;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("file system error on `{path}`: {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Removal started, so records may already be gone
    #[error("clearing `{path}` failed part way: {source}")]
    PartialClear {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt record `{path}`: {source}")]
    Corrupt { path: PathBuf, source: CodecError },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl PersistError {
    pub(super) fn fs(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::FileSystem { path, source }
    }
}

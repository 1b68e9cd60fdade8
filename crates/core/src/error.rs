//! Error types for converting a single source file.

use std::{
    path::{Path, PathBuf},
    string::FromUtf8Error,
};

/// Convenience alias used by every conversion operation in this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The broad category of a conversion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The filesystem refused a read, write, copy or directory creation
    Io,
    /// The source file is not valid UTF-8 text
    Decoding,
}

/// An error raised while reading, converting or writing one file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid UTF-8", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: FromUtf8Error,
    },

    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy {} to {}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to copy {} onto itself", path.display())]
    SameFile { path: PathBuf },

    #[error("{} is not inside the source directory {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl Error {
    /// Returns the category this error falls into. Only invalid text is a decoding error, every
    /// other failure is reported as I/O.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode { .. } => ErrorKind::Decoding,
            _ => ErrorKind::Io,
        }
    }

    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        Error::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn write(path: &Path, source: std::io::Error) -> Self {
        Error::Write {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn create_dir(path: &Path, source: std::io::Error) -> Self {
        Error::CreateDir {
            path: path.to_path_buf(),
            source,
        }
    }
}

//! Error types for package assembly.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::sign::SignError;

/// Result alias used throughout the library.
pub type Result<T, E = AppxError> = std::result::Result<T, E>;

/// A syntax error in a mapping file.
///
/// The message always contains the word `Malformed` and the name of the
/// mapping file (once known), which is what scripts grep for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed mapping file: {file_name}:{line}: {reason}")]
pub struct MalformedMappingFile {
    pub file_name: String,
    pub line: usize,
    pub reason: &'static str,
}

impl MalformedMappingFile {
    pub(crate) fn new(line: usize, reason: &'static str) -> Self {
        Self {
            file_name: "(unknown)".to_string(),
            line,
            reason,
        }
    }

    /// Attach the name of the file the text was read from.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        if !file_name.is_empty() {
            self.file_name = file_name;
        }
        self
    }
}

/// Everything that can abort assembling a package.
#[derive(Error, Debug)]
pub enum AppxError {
    #[error(transparent)]
    MalformedMappingFile(#[from] MalformedMappingFile),

    #[error("failed to read mapping file {path}: {source}")]
    MappingFileRead {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read the content of {archive_path:?}: {source}")]
    SourceRead {
        archive_path: String,
        #[source]
        source: io::Error,
    },

    #[error("archive path {archive_path:?} is given twice ({first} and {second})")]
    DuplicateArchivePath {
        archive_path: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("archive path {0:?} is reserved for a generated part")]
    ReservedArchivePath(String),

    #[error("invalid archive path {0:?}")]
    InvalidArchivePath(String),

    #[error("refusing to write directory entry {0:?}")]
    DirectoryEntry(String),

    #[error("no inputs given")]
    NoInputs,

    #[error("a mapping file cannot be combined with other inputs")]
    MixedInputs,

    #[error("compression level {0} is out of range (0-9)")]
    CompressionLevel(u32),

    #[error("{0} is too large for the archive format")]
    TooLarge(&'static str),

    #[error("deflate failed: {0}")]
    Deflate(#[from] flate2::CompressError),

    #[error("signing failed: {0}")]
    Sign(#[from] SignError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppxError {
    pub(crate) fn input(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AppxError::Input {
            path: path.into(),
            source,
        }
    }
}

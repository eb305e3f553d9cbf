//! Error types for the ocistore library.
//!
//! Every fallible operation returns a [`Result<T>`], an alias for
//! `Result<T, Error>`.  Errors carry a structured [`ErrorKind`] so callers can
//! decide, for example, whether to initialize a fresh layout or to report a
//! corrupted one, without matching on message strings.
//!
//! # Error Categories
//!
//! - **Lookup**: [`NotFound`]
//! - **Layout**: [`InvalidLayout`], [`VersionMismatch`]
//! - **Encoding**: [`Decode`], [`Encode`]
//! - **System**: [`Io`], [`Join`]
//!
//! [`NotFound`]: Error::NotFound
//! [`InvalidLayout`]: Error::InvalidLayout
//! [`VersionMismatch`]: Error::VersionMismatch
//! [`Decode`]: Error::Decode
//! [`Encode`]: Error::Encode
//! [`Io`]: Error::Io
//! [`Join`]: Error::Join

use std::{fmt, io, path::PathBuf};

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The filesystem step that failed during an I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Open,
    Read,
    Create,
    Write,
    Close,
    Stat,
    Mkdir,
    CreateTemp,
    Rename,
    Sweep,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Open => "open",
            Step::Read => "read",
            Step::Create => "create",
            Step::Write => "write",
            Step::Close => "close",
            Step::Stat => "stat",
            Step::Mkdir => "create directory",
            Step::CreateTemp => "create temporary file for",
            Step::Rename => "rename into",
            Step::Sweep => "garbage collect",
        })
    }
}

/// Coarse classification of an [`Error`], suitable for branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The reference has no matching index entry.
    NotFound,
    /// The layout marker is missing or unreadable.
    InvalidLayout,
    /// The layout marker carries an unsupported version.
    VersionMismatch,
    /// The marker or index could not be parsed.
    Decode,
    /// A document could not be serialized.
    Encode,
    /// A filesystem operation failed.
    Io,
}

impl ErrorKind {
    /// Both a missing/unreadable marker and a wrong version make a directory
    /// unusable as a layout.
    pub fn is_invalid_layout(self) -> bool {
        matches!(self, ErrorKind::InvalidLayout | ErrorKind::VersionMismatch)
    }
}

/// Error types for layout operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No index entry matches the reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// The directory is not a usable OCI layout.
    #[error("invalid layout at {}: {reason}", path.display())]
    InvalidLayout {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The layout marker has an unsupported version.
    #[error("unsupported oci layout version, expected {expected}, received {found}")]
    VersionMismatch { expected: String, found: String },

    /// A JSON document could not be parsed.
    #[error("{} cannot be parsed", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A JSON document could not be serialized.
    #[error("cannot marshal {what}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A filesystem operation failed.
    #[error("failed to {step} {}", path.display())]
    Io {
        step: Step,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A background task running a blocking operation failed.
    #[error("background task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidLayout { .. } => ErrorKind::InvalidLayout,
            Error::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Error::Decode { .. } => ErrorKind::Decode,
            Error::Encode { .. } => ErrorKind::Encode,
            Error::Io { .. } | Error::Join(_) => ErrorKind::Io,
        }
    }

    /// True for a missing index entry, and for a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            Error::InvalidLayout {
                source: Some(source),
                ..
            } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// The failing step, for [`ErrorKind::Io`] errors.
    pub fn step(&self) -> Option<Step> {
        match self {
            Error::Io { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub(crate) fn io(step: Step, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            step,
            path: path.into(),
            source,
        }
    }
}

/// Attach a [`Step`] and path to a raw `io::Result`.
pub(crate) trait IoContext<T> {
    fn with_step(self, step: Step, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_step(self, step: Step, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::io(step, path, source))
    }
}

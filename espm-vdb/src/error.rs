//! Error handling.

use std::path::PathBuf;

/// The error that can occur when working with the installed package
/// database.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An [`espm_types::Error`].
    #[error(transparent)]
    Types(#[from] espm_types::Error),

    /// An [`espm_common::Error`].
    #[error(transparent)]
    Common(#[from] espm_common::Error),

    /// A CONTENTS line does not follow the format.
    #[error("Invalid CONTENTS line {line:?}: {reason}")]
    InvalidContentsLine {
        /// The offending line.
        line: String,
        /// Why the line is rejected.
        reason: String,
    },

    /// An installed record directory is malformed.
    #[error("Malformed record at {}: {reason}", path.display())]
    MalformedRecord {
        /// The record directory.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// An I/O error occurred at a path.
    #[error("I/O error at {} while {context}: {source}", path.display())]
    IoPath {
        /// The path at which the error occurred.
        path: PathBuf,
        /// The action that failed.
        context: &'static str,
        /// The source error.
        source: std::io::Error,
    },
}

impl Error {
    /// Shorthand for [`Error::IoPath`].
    pub(crate) fn io(path: impl Into<PathBuf>, context: &'static str, source: std::io::Error) -> Self {
        Error::IoPath {
            path: path.into(),
            context,
            source,
        }
    }
}

impl From<Error> for espm_common::Error {
    /// Flattens a database error into the destination interface error.
    fn from(error: Error) -> Self {
        match error {
            Error::Common(common) => common,
            Error::Types(types) => espm_common::Error::Types(types),
            Error::IoPath {
                path,
                context,
                source,
            } => espm_common::Error::IoPath {
                path,
                context,
                source,
            },
            other => espm_common::Error::BadRecord {
                id: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

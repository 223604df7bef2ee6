//! Error handling.

use std::path::PathBuf;

/// The error that can occur while executing jobs.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An [`espm_types::Error`].
    #[error(transparent)]
    Types(#[from] espm_types::Error),

    /// An [`espm_common::Error`].
    #[error(transparent)]
    Common(#[from] espm_common::Error),

    /// An [`espm_merge::Error`].
    #[error(transparent)]
    Merge(#[from] espm_merge::Error),

    /// The backend interpreter could not be found.
    #[error("Cannot find a bash interpreter: {0}")]
    NoInterpreter(String),

    /// An id that should be buildable has no backing ebuild.
    #[error("{id} has no backing ebuild")]
    MissingEbuild {
        /// The canonical form of the id.
        id: String,
    },

    /// A fetch phase failed.
    #[error("Fetching for {id} failed with code {code}")]
    FetchFailed {
        /// The canonical form of the id.
        id: String,
        /// The exit code of the backend.
        code: i32,
    },

    /// A build phase failed.
    #[error("Phase {phases:?} for {id} failed with code {code}")]
    PhaseFailed {
        /// The canonical form of the id.
        id: String,
        /// The space separated phase list that was running.
        phases: String,
        /// The exit code of the backend.
        code: i32,
    },

    /// Execution was aborted through the abort flag.
    #[error("Execution aborted after the current phase")]
    Aborted,

    /// Execution stopped because of an earlier failure the continuation
    /// policy does not tolerate.
    #[error("Stopping after failure of {description}")]
    StoppedOnFailure {
        /// The description of the failed job.
        description: String,
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
    pub(crate) fn io(
        path: impl Into<PathBuf>,
        context: &'static str,
        source: std::io::Error,
    ) -> Self {
        Error::IoPath {
            path: path.into(),
            context,
            source,
        }
    }

    /// The process exit code this error propagates.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::FetchFailed { code, .. } | Error::PhaseFailed { code, .. } => (*code).max(2),
            _ => 2,
        }
    }
}

//! Error handling.

use std::path::PathBuf;

/// The error that can occur while merging.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An [`espm_types::Error`].
    #[error(transparent)]
    Types(#[from] espm_types::Error),

    /// An [`espm_common::Error`].
    #[error(transparent)]
    Common(#[from] espm_common::Error),

    /// A path in the image collides with a file owned by an unrelated
    /// installed package.
    #[error("{} is owned by {owner}, refusing to overwrite it", path.display())]
    Collision {
        /// The live path that collides.
        path: PathBuf,
        /// The canonical form of the owning id.
        owner: String,
    },

    /// A non-directory image entry would have to replace a live directory,
    /// or the other way around.
    #[error("{} and the image entry disagree about being a directory", path.display())]
    KindMismatch {
        /// The live path with the wrong kind.
        path: PathBuf,
    },

    /// No free config protection sibling name was left.
    #[error("No free ._cfg????_ name next to {}", path.display())]
    ConfigProtectExhausted {
        /// The protected path.
        path: PathBuf,
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
}

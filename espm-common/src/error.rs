//! Error handling.

use std::path::PathBuf;

/// The error that can occur when querying a universe or destination.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An [`espm_types::Error`].
    #[error(transparent)]
    Types(#[from] espm_types::Error),

    /// A named set does not exist.
    #[error("No such set: {0:?}")]
    NoSuchSet(String),

    /// No id with the given canonical form exists in the universe.
    #[error("No such package id: {0:?}")]
    NoSuchId(String),

    /// A destination was asked about an id it does not have installed.
    #[error("Package {id} is not installed in {destination}")]
    NotInstalledHere {
        /// The canonical form of the id.
        id: String,
        /// The repository name of the destination.
        destination: String,
    },

    /// An installed package record is malformed.
    #[error("Malformed record for {id}: {reason}")]
    BadRecord {
        /// The canonical form of the id.
        id: String,
        /// What is wrong with the record.
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

//! Error handling.

/// The error that can occur when serialising or reading back a plan.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An [`espm_types::Error`].
    #[error(transparent)]
    Types(#[from] espm_types::Error),

    /// An [`espm_common::Error`].
    #[error(transparent)]
    Common(#[from] espm_common::Error),

    /// The serialised stream does not follow the record grammar.
    #[error("Malformed plan stream: {0}")]
    BadStream(String),

    /// A well-formed record carries unexpected content.
    #[error("Malformed {record} record: {reason}")]
    BadRecord {
        /// The record type being read.
        record: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The handoff environment variable is missing or not a descriptor
    /// number.
    #[error("Bad serialised resolution descriptor: {0}")]
    BadDescriptor(String),

    /// An I/O error on the handoff stream.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// The action that failed.
        context: &'static str,
        /// The source error.
        source: std::io::Error,
    },
}

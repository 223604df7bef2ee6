//! Error handling.

/// The error that can occur while resolving.
///
/// Unable-to-make decisions are data carried in the resolution lists, not
/// errors; this type covers malformed input and broken internal invariants.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An [`espm_types::Error`].
    #[error(transparent)]
    Types(#[from] espm_types::Error),

    /// An [`espm_common::Error`].
    #[error(transparent)]
    Common(#[from] espm_common::Error),

    /// A target string is neither a spec, a blocker nor a known set name.
    #[error("Cannot make sense of target {0:?}")]
    BadTarget(String),

    /// No repository is configured for a destination type.
    #[error("No destination repository configured for {destination}")]
    NoDestinationRepository {
        /// The destination type that has no repository.
        destination: String,
    },

    /// An internal invariant was violated.
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),
}

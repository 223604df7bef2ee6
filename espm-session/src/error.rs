//! Error handling.

/// The error that can occur while running a session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An [`espm_types::Error`].
    #[error(transparent)]
    Types(#[from] espm_types::Error),

    /// An [`espm_common::Error`].
    #[error(transparent)]
    Common(#[from] espm_common::Error),

    /// An [`espm_resolve::Error`].
    #[error(transparent)]
    Resolve(#[from] espm_resolve::Error),

    /// An [`espm_plan::Error`].
    #[error(transparent)]
    Plan(#[from] espm_plan::Error),

    /// An [`espm_exec::Error`].
    #[error(transparent)]
    Exec(#[from] espm_exec::Error),

    /// An [`espm_vdb::Error`].
    #[error(transparent)]
    Vdb(#[from] espm_vdb::Error),

    /// An [`espm_merge::Error`].
    #[error(transparent)]
    Merge(#[from] espm_merge::Error),

    /// The session is configured in a way that cannot work.
    #[error("Configuration error: {0}")]
    Config(String),
}

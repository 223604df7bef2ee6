//! Error handling.

/// The error that can occur when working with espm types.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A version string does not follow the version grammar.
    #[error("Invalid version {input:?}: {reason}")]
    InvalidVersion {
        /// The offending input.
        input: String,
        /// Why the input is rejected.
        reason: String,
    },

    /// An invalid category name.
    #[error("Invalid category name: {0:?}")]
    InvalidCategoryName(String),

    /// An invalid package name.
    #[error("Invalid package name: {0:?}")]
    InvalidPackageName(String),

    /// An invalid qualified `category/package` name.
    #[error("Invalid qualified package name: {0:?}")]
    InvalidQualifiedPackageName(String),

    /// An invalid slot name.
    #[error("Invalid slot name: {0:?}")]
    InvalidSlotName(String),

    /// An invalid keyword.
    #[error("Invalid keyword: {0:?}")]
    InvalidKeyword(String),

    /// An invalid repository name.
    #[error("Invalid repository name: {0:?}")]
    InvalidRepositoryName(String),

    /// An invalid choice (use flag) name.
    #[error("Invalid choice name: {0:?}")]
    InvalidChoiceName(String),

    /// A package dependency specification that does not follow the spec
    /// grammar.
    #[error("Bad package dep spec {input:?}: {reason}")]
    BadSpec {
        /// The offending input.
        input: String,
        /// Why the input is rejected.
        reason: String,
    },

    /// A dependency string (a whole metadata value) that cannot be parsed
    /// into a dependency tree.
    #[error("Bad dependency string {input:?}: {reason}")]
    BadDependencyString {
        /// The offending input.
        input: String,
        /// Why the input is rejected.
        reason: String,
    },

    /// A package id that violates a structural invariant.
    #[error("Invalid package id {id}: {reason}")]
    InvalidPackageId {
        /// The canonical form of the offending id.
        id: String,
        /// The violated invariant.
        reason: String,
    },
}

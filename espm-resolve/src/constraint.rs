//! Constraints and the reasons they exist.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use espm_common::DestinationType;
use espm_types::{BlockStrength, PackageDep, PackageId};
use strum::{Display as StrumDisplay, EnumString};

use crate::SanitisedDependency;

/// How willing a constraint is to be satisfied by an already installed id.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, StrumDisplay, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum UseExisting {
    /// Never; a fresh install is required.
    Never,
    /// Only if the installed id is transient.
    IfTransient,
    /// Only if the installed id's exact version is still available.
    IfSameVersion,
    /// Only if an origin id with the same version and slot is still
    /// available.
    IfSame,
    /// Whenever the installed id satisfies the spec.
    IfPossible,
}

/// Why a constraint exists.
#[derive(Clone, Debug)]
pub enum Reason {
    /// The user asked for it on the command line.
    Target {
        /// The target as typed.
        text: String,
    },
    /// It is a member of a named set.
    Set {
        /// The set name.
        name: String,
    },
    /// A chosen id depends on it.
    Dependency {
        /// The depending id.
        from: Arc<PackageId>,
        /// The flattened dependency that asked for it.
        dep: SanitisedDependency,
    },
    /// Preset by an earlier resolver attempt before a restart.
    Preset,
    /// Needed because another resolvent is built via a binary.
    ViaBinary {
        /// The other resolvent, printed.
        other: String,
    },
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Reason::Target { text } => write!(f, "target {text:?}"),
            Reason::Set { name } => write!(f, "set {name:?}"),
            Reason::Dependency { from, dep } => write!(
                f,
                "{} of {}",
                dep.metadata_key_human_name(),
                from.canonical_form()
            ),
            Reason::Preset => write!(f, "preset"),
            Reason::ViaBinary { other } => write!(f, "via binary for {other}"),
        }
    }
}

/// One requirement on a resolvent.
#[derive(Clone, Debug)]
pub struct Constraint {
    /// The spec a chosen id has to match.
    pub spec: PackageDep,
    /// Set when the constraint demands absence rather than presence.
    pub block: Option<BlockStrength>,
    /// Where the satisfying id has to install to.
    pub destination: DestinationType,
    /// How willing the constraint is to keep an installed id.
    pub use_existing: UseExisting,
    /// Whether leaving the resolvent uninstalled also satisfies the
    /// constraint.
    pub nothing_is_fine_too: bool,
    /// Whether the constraint comes from a discarded suggestion.
    pub untaken: bool,
    /// Why the constraint exists.
    pub reason: Arc<Reason>,
}

impl Constraint {
    /// Whether `id` satisfies the version, slot and repository parts of the
    /// constraint.
    ///
    /// Blocks are satisfied by absence and never by a candidate.
    pub fn allows_candidate(&self, id: &PackageId) -> bool {
        if self.block.is_some() {
            return false;
        }
        self.spec
            .matches_version_slot_repo(id.version(), id.slot(), id.repository())
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if let Some(block) = self.block {
            match block {
                BlockStrength::Weak => write!(f, "!")?,
                BlockStrength::Strong => write!(f, "!!")?,
            }
        }
        write!(
            f,
            "{} ({}, {})",
            self.spec, self.use_existing, self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    fn candidate(canonical: &str) -> PackageId {
        let (name, version, slot, repository) =
            PackageId::canonical_parts(canonical).unwrap();
        let mut builder = PackageId::builder(name, version, repository);
        if let Some(slot) = slot {
            builder = builder.with_slot(slot);
        }
        builder.build()
    }

    fn constraint(spec: &str, block: Option<BlockStrength>) -> Constraint {
        Constraint {
            spec: spec.parse().unwrap(),
            block,
            destination: DestinationType::InstallToSlash,
            use_existing: UseExisting::IfPossible,
            nothing_is_fine_too: false,
            untaken: false,
            reason: Arc::new(Reason::Target {
                text: spec.to_string(),
            }),
        }
    }

    #[rstest]
    #[case(">=cat/pkg-2", "cat/pkg-3::test", true)]
    #[case(">=cat/pkg-2", "cat/pkg-1::test", false)]
    #[case("cat/pkg:1", "cat/pkg-3:1::test", true)]
    #[case("cat/pkg:1", "cat/pkg-3:2::test", false)]
    fn candidate_matching(
        #[case] spec: &str,
        #[case] id: &str,
        #[case] allowed: bool,
    ) -> TestResult {
        assert_eq!(
            constraint(spec, None).allows_candidate(&candidate(id)),
            allowed
        );
        Ok(())
    }

    #[rstest]
    fn blocks_never_allow_candidates() -> TestResult {
        let block = constraint("cat/pkg", Some(BlockStrength::Weak));
        assert!(!block.allows_candidate(&candidate("cat/pkg-1::test")));
        assert_eq!(block.to_string(), "!cat/pkg (if-possible, target \"cat/pkg\")");
        Ok(())
    }
}

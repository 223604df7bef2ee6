//! Decisions.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use espm_types::{PackageId, RepositoryName};

use crate::{Constraint, Resolvent, SanitisedDependency};

/// Where a change installs to and what it replaces.
#[derive(Clone, Debug)]
pub struct ChangeDestination {
    /// The repository the change installs into.
    pub repository: RepositoryName,
    /// The installed ids in the same slot the change replaces.
    pub replacing: Vec<Arc<PackageId>>,
}

/// A candidate that was considered and rejected, with why.
#[derive(Clone, Debug)]
pub struct UnsuitableCandidate {
    /// The rejected id.
    pub id: Arc<PackageId>,
    /// Every reason the id was rejected: masks and failing constraints.
    pub problems: Vec<String>,
}

impl Display for UnsuitableCandidate {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}: {}", self.id.canonical_form(), self.problems.join("; "))
    }
}

/// What the resolver decided for one resolvent.
#[derive(Clone, Debug)]
pub enum Decision {
    /// The resolvent need not exist and nothing is installed.
    NothingNoChange,
    /// Keep an installed id.
    ExistingNoChange {
        /// The installed id being kept.
        id: Arc<PackageId>,
        /// Whether the kept id is transient.
        is_transient: bool,
        /// Whether no better origin candidate exists.
        is_best: bool,
    },
    /// Install a fresh id.
    ChangesToMake {
        /// The origin id to build and install.
        origin: Arc<PackageId>,
        /// Where it goes and what it replaces.
        destination: ChangeDestination,
    },
    /// Uninstall ids.
    Remove {
        /// The installed ids to remove.
        ids: Vec<Arc<PackageId>>,
    },
    /// No acceptable candidate exists.
    UnableToMake {
        /// Every considered and rejected candidate.
        unsuitable: Vec<UnsuitableCandidate>,
        /// The constraints that could not be met.
        unmet_constraints: Vec<Constraint>,
    },
}

impl Decision {
    /// The id the decision settles on, when it settles on one.
    pub fn chosen_id(&self) -> Option<&Arc<PackageId>> {
        match self {
            Decision::ExistingNoChange { id, .. } => Some(id),
            Decision::ChangesToMake { origin, .. } => Some(origin),
            _ => None,
        }
    }

    /// Whether the decision represents a failure.
    pub fn is_unable(&self) -> bool {
        matches!(self, Decision::UnableToMake { .. })
    }
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Decision::NothingNoChange => write!(f, "nothing to do"),
            Decision::ExistingNoChange { id, .. } => {
                write!(f, "keep {}", id.canonical_form())
            }
            Decision::ChangesToMake {
                origin,
                destination,
            } => {
                write!(
                    f,
                    "install {} to ::{}",
                    origin.canonical_form(),
                    destination.repository
                )?;
                if !destination.replacing.is_empty() {
                    let replacing: Vec<String> = destination
                        .replacing
                        .iter()
                        .map(|id| id.canonical_form())
                        .collect();
                    write!(f, " replacing {}", replacing.join(", "))?;
                }
                Ok(())
            }
            Decision::Remove { ids } => {
                let ids: Vec<String> = ids.iter().map(|id| id.canonical_form()).collect();
                write!(f, "remove {}", ids.join(", "))
            }
            Decision::UnableToMake { unsuitable, .. } => {
                write!(f, "unable ({} candidates rejected)", unsuitable.len())
            }
        }
    }
}

/// A dependency group of the chosen id that could not be satisfied.
///
/// Recorded when an any-of group has no viable alternative. A fatal note
/// turns the resolution into a taken error; a non-fatal one is display-only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnmetNote {
    /// The original text of the group.
    pub group: String,
    /// Where the group came from, human readable.
    pub origin: String,
    /// Whether the note fails the resolution.
    pub fatal: bool,
}

impl Display for UnmetNote {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "no viable alternative in {} ({})", self.group, self.origin)
    }
}

/// One resolvent together with everything decided about it.
#[derive(Clone, Debug)]
pub struct Resolution {
    /// The resolvent.
    pub resolvent: Resolvent,
    /// Every constraint seen so far, in arrival order.
    pub constraints: Vec<Constraint>,
    /// The decision, once one was made.
    pub decision: Option<Decision>,
    /// The flattened dependencies of the chosen id, when taken.
    pub sanitised: Vec<SanitisedDependency>,
    /// Dependency groups of the chosen id that could not be satisfied.
    pub unmet_notes: Vec<UnmetNote>,
}

impl Resolution {
    /// Creates an undecided resolution.
    pub fn new(resolvent: Resolvent) -> Self {
        Self {
            resolvent,
            constraints: Vec::new(),
            decision: None,
            sanitised: Vec::new(),
            unmet_notes: Vec::new(),
        }
    }

    /// Whether every constraint stems from discarded suggestions.
    pub fn is_untaken(&self) -> bool {
        !self.constraints.is_empty()
            && self.constraints.iter().all(|constraint| constraint.untaken)
    }

    /// Whether the resolution is a failure the user asked for directly or
    /// transitively: an unable decision, or a fatal unmet note.
    pub fn is_taken_error(&self) -> bool {
        let unable = self
            .decision
            .as_ref()
            .map(Decision::is_unable)
            .unwrap_or(false);
        let fatal_note = self.unmet_notes.iter().any(|note| note.fatal);
        (unable || fatal_note) && !self.is_untaken()
    }
}

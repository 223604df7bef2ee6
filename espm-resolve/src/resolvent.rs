//! Resolvents.

use std::fmt::{Display, Formatter};

use espm_common::DestinationType;
use espm_types::{PackageDep, QualifiedPackageName, Slot, SlotRequirement};

/// The slot half of a resolvent.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResolventSlot {
    /// A specific slot.
    Named(Slot),
    /// Whichever slot the chosen candidate lives in.
    Any,
}

impl ResolventSlot {
    /// Whether a candidate in `slot` belongs to this resolvent.
    pub fn allows(&self, slot: Option<&Slot>) -> bool {
        match self {
            ResolventSlot::Named(wanted) => slot == Some(wanted),
            ResolventSlot::Any => true,
        }
    }
}

impl Display for ResolventSlot {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ResolventSlot::Named(slot) => write!(f, ":{slot}"),
            ResolventSlot::Any => write!(f, ":*"),
        }
    }
}

/// The resolver's unit of work: a package, a slot, and where to install.
///
/// Equality is structural; one decision is made per resolvent.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Resolvent {
    /// The qualified package name.
    pub name: QualifiedPackageName,
    /// The slot the work is about.
    pub slot: ResolventSlot,
    /// Where the result installs to.
    pub destination: DestinationType,
}

impl Resolvent {
    /// Creates the resolvent a spec resolves to for `destination`.
    ///
    /// A spec naming a slot pins the resolvent to it; `:*`, `:=` and
    /// slot-free specs work on whichever slot the candidate election picks.
    pub fn for_spec(spec: &PackageDep, destination: DestinationType) -> Self {
        let slot = match spec.slot() {
            Some(SlotRequirement::Named(slot)) => ResolventSlot::Named(slot.clone()),
            Some(SlotRequirement::Any | SlotRequirement::Rebuild) | None => ResolventSlot::Any,
        };
        Resolvent {
            name: spec.name().clone(),
            slot,
            destination,
        }
    }
}

impl Display for Resolvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}{} -> {}", self.name, self.slot, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    #[rstest]
    #[case("cat/pkg", "cat/pkg:* -> install-to-slash")]
    #[case("cat/pkg:2", "cat/pkg:2 -> install-to-slash")]
    #[case("cat/pkg:*", "cat/pkg:* -> install-to-slash")]
    #[case("cat/pkg:=", "cat/pkg:* -> install-to-slash")]
    fn resolvent_for_spec(#[case] spec: &str, #[case] display: &str) -> TestResult {
        let resolvent =
            Resolvent::for_spec(&spec.parse()?, DestinationType::InstallToSlash);
        assert_eq!(resolvent.to_string(), display);
        Ok(())
    }

    #[rstest]
    fn structural_equality() -> TestResult {
        let a = Resolvent::for_spec(&"cat/pkg:2".parse()?, DestinationType::InstallToSlash);
        let b = Resolvent::for_spec(&">=cat/pkg-1:2".parse()?, DestinationType::InstallToSlash);
        let c = Resolvent::for_spec(&"cat/pkg:2".parse()?, DestinationType::CreateBinary);
        assert_eq!(a, b);
        assert_ne!(a, c);
        Ok(())
    }
}

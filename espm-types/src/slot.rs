//! Slot names and slot requirements.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::Serialize;

use crate::Error;

/// A slot name.
///
/// Slots partition a package's version space into parallel-installable
/// groups. The name is an opaque identifier starting with an alphanumeric
/// character or `_`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Slot(String);

impl Slot {
    /// Creates a new [`Slot`] from a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty or contains characters outside the
    /// slot name alphabet.
    pub fn new(name: &str) -> Result<Self, Error> {
        let mut chars = name.chars();
        let valid = match chars.next() {
            Some(first) => {
                (first.is_ascii_alphanumeric() || first == '_')
                    && chars.all(|c| {
                        c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.')
                    })
            }
            None => false,
        };
        if valid {
            Ok(Slot(name.to_string()))
        } else {
            Err(Error::InvalidSlotName(name.to_string()))
        }
    }

    /// Returns a reference to the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Slot {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Slot::new(input)
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The slot part of a package dependency specification.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum SlotRequirement {
    /// A named slot, `:slot`.
    Named(Slot),
    /// Any slot, `:*`.
    Any,
    /// Any slot, with a rebuild-on-change marker, `:=`.
    ///
    /// The marker is carried and displayed; rebuild bookkeeping is outside
    /// the resolver core.
    Rebuild,
}

impl SlotRequirement {
    /// Whether a package in `slot` satisfies this requirement.
    pub fn allows(&self, slot: Option<&Slot>) -> bool {
        match self {
            SlotRequirement::Named(wanted) => slot == Some(wanted),
            SlotRequirement::Any | SlotRequirement::Rebuild => true,
        }
    }
}

impl Display for SlotRequirement {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SlotRequirement::Named(slot) => write!(f, ":{slot}"),
            SlotRequirement::Any => write!(f, ":*"),
            SlotRequirement::Rebuild => write!(f, ":="),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    #[rstest]
    #[case("0", true)]
    #[case("2.7", true)]
    #[case("slot2", true)]
    #[case("", false)]
    #[case("has space", false)]
    #[case("*", false)]
    fn slot_name(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(Slot::new(input).is_ok(), ok);
    }

    #[rstest]
    fn requirement_allows() -> TestResult {
        let slot2 = Slot::new("2")?;
        let named = SlotRequirement::Named(slot2.clone());
        assert!(named.allows(Some(&slot2)));
        assert!(!named.allows(Some(&Slot::new("1")?)));
        assert!(!named.allows(None));
        assert!(SlotRequirement::Any.allows(None));
        assert!(SlotRequirement::Rebuild.allows(Some(&slot2)));
        Ok(())
    }
}

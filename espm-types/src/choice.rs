//! Choices (use flags) and their grouping.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::Serialize;

use crate::Error;

/// The name of a single choice (use flag), e.g. `ssl` or `linguas_en`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ChoiceName(String);

impl ChoiceName {
    /// Creates a new [`ChoiceName`] from a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` does not follow the flag name alphabet.
    pub fn new(name: &str) -> Result<Self, Error> {
        let mut chars = name.chars();
        let valid = match chars.next() {
            Some(first) => {
                first.is_ascii_alphanumeric()
                    && chars.all(|c| {
                        c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '@' | '.' | '-')
                    })
            }
            None => false,
        };
        if valid {
            Ok(ChoiceName(name.to_string()))
        } else {
            Err(Error::InvalidChoiceName(name.to_string()))
        }
    }

    /// Returns a reference to the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChoiceName {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ChoiceName::new(input)
    }
}

impl Display for ChoiceName {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One toggleable option of a package.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ChoiceValue {
    /// The unprefixed flag name (`en` for `linguas_en`).
    pub name: ChoiceName,
    /// The lowercase prefix of the owning set, if any (`linguas`).
    pub prefix: Option<String>,
    /// Whether the flag is currently enabled.
    pub enabled: bool,
    /// Whether the flag state may not be changed by the user.
    pub locked: bool,
    /// Whether the package lists the flag explicitly in its options key.
    pub explicitly_listed: bool,
    /// Whether the flag would be enabled with no user configuration.
    pub enabled_by_default: bool,
}

impl ChoiceValue {
    /// Returns the flag name with its set prefix applied, as used by
    /// conditional dependencies.
    pub fn name_with_prefix(&self) -> ChoiceName {
        match &self.prefix {
            Some(prefix) => ChoiceName(format!("{prefix}_{}", self.name)),
            None => self.name.clone(),
        }
    }
}

/// A named group of [`ChoiceValue`]s.
///
/// The raw name is the metadata variable the group came from (`USE`,
/// `LINGUAS`, ...), used for prefixed display of expanded sets.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ChoiceSet {
    /// The raw variable name of the set.
    pub raw_name: String,
    /// The human readable name of the set.
    pub human_name: String,
    /// The lowercase prefix values of this set carry, if any.
    pub prefix: Option<String>,
    /// The values of the set.
    pub values: Vec<ChoiceValue>,
}

/// All choices of one package id, grouped into sets.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Choices {
    sets: Vec<ChoiceSet>,
}

impl Choices {
    /// Creates a new [`Choices`] from its sets.
    pub fn new(sets: Vec<ChoiceSet>) -> Self {
        Self { sets }
    }

    /// Returns the sets.
    pub fn sets(&self) -> &[ChoiceSet] {
        &self.sets
    }

    /// Looks a value up by its prefixed name.
    pub fn find(&self, name: &ChoiceName) -> Option<&ChoiceValue> {
        self.sets
            .iter()
            .flat_map(|set| set.values.iter())
            .find(|value| &value.name_with_prefix() == name)
    }

    /// Returns the state of the named flag, or `None` if the package does
    /// not know it.
    pub fn state(&self, name: &ChoiceName) -> Option<bool> {
        self.find(name).map(|value| value.enabled)
    }

    /// Whether the named flag is known and enabled.
    pub fn is_enabled(&self, name: &ChoiceName) -> bool {
        self.state(name).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    fn value(name: &str, prefix: Option<&str>, enabled: bool) -> ChoiceValue {
        ChoiceValue {
            name: ChoiceName::new(name).unwrap(),
            prefix: prefix.map(str::to_string),
            enabled,
            locked: false,
            explicitly_listed: true,
            enabled_by_default: false,
        }
    }

    #[rstest]
    fn prefixed_lookup() -> TestResult {
        let choices = Choices::new(vec![
            ChoiceSet {
                raw_name: "USE".to_string(),
                human_name: "USE".to_string(),
                prefix: None,
                values: vec![value("ssl", None, true), value("doc", None, false)],
            },
            ChoiceSet {
                raw_name: "LINGUAS".to_string(),
                human_name: "Linguas".to_string(),
                prefix: Some("linguas".to_string()),
                values: vec![value("en", Some("linguas"), true)],
            },
        ]);

        assert_eq!(choices.state(&ChoiceName::new("ssl")?), Some(true));
        assert_eq!(choices.state(&ChoiceName::new("doc")?), Some(false));
        assert_eq!(choices.state(&ChoiceName::new("linguas_en")?), Some(true));
        assert_eq!(choices.state(&ChoiceName::new("en")?), None);
        assert!(!choices.is_enabled(&ChoiceName::new("unknown")?));
        Ok(())
    }

    #[rstest]
    #[case("ssl", true)]
    #[case("python_targets_python3", true)]
    #[case("", false)]
    #[case("-flag", false)]
    fn choice_name(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(ChoiceName::new(input).is_ok(), ok);
    }
}

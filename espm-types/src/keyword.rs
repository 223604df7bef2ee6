//! Keywords.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::Serialize;

use crate::Error;

/// An architecture/stability keyword, e.g. `amd64`, `~arm64` or `-*`.
///
/// Keywords are opaque to the resolver beyond their leading stability
/// marker; masking policy interprets them.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Keyword(String);

impl Keyword {
    /// Creates a new [`Keyword`] from a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if `keyword` is empty or contains whitespace.
    pub fn new(keyword: &str) -> Result<Self, Error> {
        if keyword.is_empty() || keyword.chars().any(char::is_whitespace) {
            Err(Error::InvalidKeyword(keyword.to_string()))
        } else {
            Ok(Keyword(keyword.to_string()))
        }
    }

    /// Returns a reference to the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this keyword is a testing keyword (`~arch`).
    pub fn is_testing(&self) -> bool {
        self.0.starts_with('~')
    }

    /// Whether this keyword disables an architecture (`-arch` or `-*`).
    pub fn is_disabled(&self) -> bool {
        self.0.starts_with('-')
    }
}

impl FromStr for Keyword {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Keyword::new(input)
    }
}

impl Display for Keyword {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Package versions and their total order.

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::Serialize;
use strum::{Display as StrumDisplay, EnumString};
use winnow::{
    ModalResult,
    Parser,
    ascii::dec_uint,
    combinator::{alt, cut_err, eof, opt, preceded, repeat},
    error::{StrContext, StrContextValue},
    token::{one_of, take_while},
};

use crate::Error;

/// One numeric component of a version.
///
/// The source digits are kept verbatim, so that `"0"` and `"00"` remain
/// distinguishable in display and in string-form cache lookups, while
/// comparison follows the version ordering rules.
#[derive(Clone, Debug, Serialize)]
pub struct NumericPart(String);

impl NumericPart {
    /// Returns the source digits.
    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Whether the component starts with a zero digit.
    fn has_leading_zero(&self) -> bool {
        self.0.starts_with('0')
    }

    /// Compares two components as arbitrary precision integers.
    ///
    /// Leading zeros are stripped, then the longer digit string wins, with a
    /// lexicographic tiebreak.
    fn numeric_cmp(&self, other: &NumericPart) -> Ordering {
        let a = self.0.trim_start_matches('0');
        let b = other.0.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }

    /// Compares two components using the string rule.
    ///
    /// Used whenever either side has a leading zero: both sides are compared
    /// as strings after stripping trailing zeros.
    fn string_cmp(&self, other: &NumericPart) -> Ordering {
        self.0
            .trim_end_matches('0')
            .cmp(other.0.trim_end_matches('0'))
    }
}

/// The kind of a version suffix.
///
/// The canonical order is `_alpha < _beta < _pre < _rc < (no suffix) < _p`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, StrumDisplay, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SuffixKind {
    /// `_alpha`
    Alpha,
    /// `_beta`
    Beta,
    /// `_pre`
    Pre,
    /// `_rc`
    Rc,
    /// `_p`
    P,
}

impl SuffixKind {
    /// The rank of the suffix in the canonical order.
    ///
    /// Rank `4` is reserved for "no suffix".
    fn rank(self) -> u8 {
        match self {
            SuffixKind::Alpha => 0,
            SuffixKind::Beta => 1,
            SuffixKind::Pre => 2,
            SuffixKind::Rc => 3,
            SuffixKind::P => 5,
        }
    }
}

/// A version suffix with its optional number, e.g. `_rc3`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct VersionSuffix {
    /// The suffix kind.
    pub kind: SuffixKind,
    /// The optional suffix number; absence compares equal to `0`.
    pub number: Option<u64>,
}

impl VersionSuffix {
    fn cmp_pair(&self, other: &VersionSuffix) -> Ordering {
        self.kind
            .rank()
            .cmp(&other.kind.rank())
            .then_with(|| self.number.unwrap_or(0).cmp(&other.number.unwrap_or(0)))
    }
}

/// A package version.
///
/// A version is a dot-separated sequence of numeric components, an optional
/// single letter, any number of `_alpha|_beta|_pre|_rc|_p` suffixes each with
/// an optional number, and an optional `-rN` revision.
///
/// The total order follows the package manager specification: components are
/// compared left to right (numerically, or with the string rule when a
/// leading zero is involved), then the letter (absence orders before
/// presence), then the suffix lists, then the revision (absence equals
/// `-r0`).
///
/// ## Examples
/// ```
/// use std::str::FromStr;
///
/// use espm_types::Version;
///
/// # fn main() -> Result<(), espm_types::Error> {
/// assert!(Version::from_str("1")? < Version::from_str("1.0")?);
/// assert!(Version::from_str("1_pre")? < Version::from_str("1")?);
/// assert!(Version::from_str("1")? < Version::from_str("1_p1")?);
/// assert!(Version::from_str("1")? == Version::from_str("1-r0")?);
/// assert!(Version::from_str("9999")?.is_scm());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Serialize)]
pub struct Version {
    parts: Vec<NumericPart>,
    letter: Option<char>,
    suffixes: Vec<VersionSuffix>,
    revision: Option<u64>,
}

impl Version {
    /// Creates a new [`Version`] from a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if `version` does not follow the version grammar.
    pub fn new(version: &str) -> Result<Self, Error> {
        Self::parser
            .parse(version)
            .map_err(|e| Error::InvalidVersion {
                input: version.to_string(),
                reason: e.inner().to_string(),
            })
    }

    /// Recognizes a [`Version`] in a string slice.
    fn parser(input: &mut &str) -> ModalResult<Version> {
        fn numeric_part(input: &mut &str) -> ModalResult<NumericPart> {
            take_while(1.., |c: char| c.is_ascii_digit())
                .map(|digits: &str| NumericPart(digits.to_string()))
                .context(StrContext::Expected(StrContextValue::Description(
                    "numeric version component",
                )))
                .parse_next(input)
        }

        fn suffix(input: &mut &str) -> ModalResult<VersionSuffix> {
            (
                alt(("alpha", "beta", "pre", "rc", "p")).context(StrContext::Expected(
                    StrContextValue::Description("one of _alpha, _beta, _pre, _rc, _p"),
                )),
                opt(dec_uint::<_, u64, _>),
            )
                .map(|(kind, number): (&str, Option<u64>)| VersionSuffix {
                    // The alternatives are exactly the serialized forms.
                    kind: kind.parse().unwrap_or(SuffixKind::P),
                    number,
                })
                .parse_next(input)
        }

        let first = numeric_part.parse_next(input)?;
        let rest: Vec<NumericPart> = repeat(0.., preceded('.', numeric_part)).parse_next(input)?;
        let letter = opt(one_of('a'..='z')).parse_next(input)?;
        let suffixes: Vec<VersionSuffix> = repeat(0.., preceded('_', suffix)).parse_next(input)?;
        let revision = opt(preceded(
            "-r",
            cut_err(dec_uint::<_, u64, _>).context(StrContext::Expected(
                StrContextValue::Description("revision number after -r"),
            )),
        ))
        .parse_next(input)?;
        eof.context(StrContext::Expected(StrContextValue::Description(
            "end of version",
        )))
        .parse_next(input)?;

        let mut parts = Vec::with_capacity(1 + rest.len());
        parts.push(first);
        parts.extend(rest);

        Ok(Version {
            parts,
            letter,
            suffixes,
            revision,
        })
    }

    /// Returns the numeric components.
    pub fn parts(&self) -> &[NumericPart] {
        &self.parts
    }

    /// Returns the optional letter.
    pub fn letter(&self) -> Option<char> {
        self.letter
    }

    /// Returns the suffixes.
    pub fn suffixes(&self) -> &[VersionSuffix] {
        &self.suffixes
    }

    /// Returns the revision, treating absence as `0`.
    pub fn revision(&self) -> u64 {
        self.revision.unwrap_or(0)
    }

    /// Whether the version flags an unstable development head.
    ///
    /// True iff the last numeric component consists entirely of nines and is
    /// at least four digits long (`9999`, `99999999`, ...).
    pub fn is_scm(&self) -> bool {
        self.parts
            .last()
            .map(|part| part.0.len() >= 4 && part.0.bytes().all(|b| b == b'9'))
            .unwrap_or(false)
    }

    /// Returns a copy of the version without its revision.
    pub fn remove_revision(&self) -> Version {
        Version {
            revision: None,
            ..self.clone()
        }
    }

    /// Returns the revision part formatted as `rN`.
    pub fn revision_only(&self) -> String {
        format!("r{}", self.revision())
    }

    /// Compares two versions while ignoring their revisions.
    pub fn cmp_without_revision(&self, other: &Version) -> Ordering {
        self.cmp_structure(other)
    }

    /// Compares everything up to but excluding the revision.
    fn cmp_structure(&self, other: &Version) -> Ordering {
        let common = self.parts.len().min(other.parts.len());

        let first_cmp = self.parts[0].numeric_cmp(&other.parts[0]);
        if first_cmp.is_ne() {
            return first_cmp;
        }

        for (a, b) in self.parts[1..common].iter().zip(&other.parts[1..common]) {
            let part_cmp = if a.has_leading_zero() || b.has_leading_zero() {
                a.string_cmp(b)
            } else {
                a.numeric_cmp(b)
            };
            if part_cmp.is_ne() {
                return part_cmp;
            }
        }

        let len_cmp = self.parts.len().cmp(&other.parts.len());
        if len_cmp.is_ne() {
            return len_cmp;
        }

        // Absence of a letter orders before presence.
        let letter_cmp = self.letter.cmp(&other.letter);
        if letter_cmp.is_ne() {
            return letter_cmp;
        }

        let common = self.suffixes.len().min(other.suffixes.len());
        for (a, b) in self.suffixes[..common].iter().zip(&other.suffixes[..common]) {
            let suffix_cmp = a.cmp_pair(b);
            if suffix_cmp.is_ne() {
                return suffix_cmp;
            }
        }
        match (self.suffixes.get(common), other.suffixes.get(common)) {
            (Some(extra), None) => {
                if extra.kind == SuffixKind::P {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (None, Some(extra)) => {
                if extra.kind == SuffixKind::P {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            _ => Ordering::Equal,
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Creates a [`Version`] from a string slice.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Version::new(input)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let mut parts = self.parts.iter();
        if let Some(first) = parts.next() {
            write!(f, "{}", first.digits())?;
        }
        for part in parts {
            write!(f, ".{}", part.digits())?;
        }
        if let Some(letter) = self.letter {
            write!(f, "{letter}")?;
        }
        for suffix in &self.suffixes {
            write!(f, "_{}", suffix.kind)?;
            if let Some(number) = suffix.number {
                write!(f, "{number}")?;
            }
        }
        if let Some(revision) = self.revision {
            write!(f, "-r{revision}")?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_structure(other)
            .then_with(|| self.revision().cmp(&other.revision()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // The hash must agree with the ordering based equality: hash the
        // canonical comparison key of every field rather than the raw digits.
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 && part.has_leading_zero() {
                b's'.hash(state);
                part.0.trim_end_matches('0').hash(state);
            } else {
                b'n'.hash(state);
                part.0.trim_start_matches('0').hash(state);
            }
        }
        self.letter.hash(state);
        for suffix in &self.suffixes {
            suffix.kind.rank().hash(state);
            suffix.number.unwrap_or(0).hash(state);
        }
        self.revision().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    #[rstest]
    #[case("1", 1, None, 0, 0)]
    #[case("1.0", 2, None, 0, 0)]
    #[case("1.0a", 2, Some('a'), 0, 0)]
    #[case("1.2.3_alpha4_p5", 3, None, 2, 0)]
    #[case("4.16-r2", 2, None, 0, 2)]
    #[case("0.99_rc", 2, None, 1, 0)]
    fn version_structure(
        #[case] input: &str,
        #[case] parts: usize,
        #[case] letter: Option<char>,
        #[case] suffixes: usize,
        #[case] revision: u64,
    ) -> TestResult {
        let version = Version::new(input)?;
        assert_eq!(version.parts().len(), parts);
        assert_eq!(version.letter(), letter);
        assert_eq!(version.suffixes().len(), suffixes);
        assert_eq!(version.revision(), revision);
        Ok(())
    }

    #[rstest]
    #[case("")]
    #[case("a")]
    #[case("1.")]
    #[case("1..2")]
    #[case("1.0ab")]
    #[case("1_gamma")]
    #[case("1-r")]
    #[case("1-rc1")]
    #[case("1 ")]
    fn invalid_version(#[case] input: &str) {
        assert!(Version::new(input).is_err());
    }

    #[rstest]
    #[case("1", "1.0", Ordering::Less)]
    #[case("1.0", "1.0a", Ordering::Less)]
    #[case("1.0a", "1.0b", Ordering::Less)]
    #[case("1_pre", "1", Ordering::Less)]
    #[case("1", "1_p1", Ordering::Less)]
    #[case("1_alpha", "1_beta", Ordering::Less)]
    #[case("1_beta", "1_pre", Ordering::Less)]
    #[case("1_pre", "1_rc", Ordering::Less)]
    #[case("1_rc", "1_p", Ordering::Less)]
    #[case("1_p1", "1_p2", Ordering::Less)]
    #[case("1-r1", "1-r2", Ordering::Less)]
    #[case("1", "1-r1", Ordering::Less)]
    #[case("1-r0", "1", Ordering::Equal)]
    #[case("1_p", "1_p0", Ordering::Equal)]
    #[case("1.2.3", "1.2.3", Ordering::Equal)]
    #[case("10", "9", Ordering::Greater)]
    #[case("1.01", "1.1", Ordering::Less)]
    #[case("1.010", "1.01", Ordering::Equal)]
    #[case("1.0", "1.00", Ordering::Equal)]
    #[case("01", "1", Ordering::Equal)]
    #[case("1.2", "1.10", Ordering::Less)]
    #[case("1.1.2", "1.1", Ordering::Greater)]
    #[case("2.0_rc3", "2.0", Ordering::Less)]
    #[case("2.0_p1-r1", "2.0_p1", Ordering::Greater)]
    #[case("20220101", "20220201", Ordering::Less)]
    fn version_total_order(
        #[case] a: &str,
        #[case] b: &str,
        #[case] expected: Ordering,
    ) -> TestResult {
        let a = Version::new(a)?;
        let b = Version::new(b)?;
        assert_eq!(a.cmp(&b), expected);
        assert_eq!(b.cmp(&a), expected.reverse());
        assert_eq!(a == b, expected == Ordering::Equal);
        Ok(())
    }

    #[rstest]
    #[case("9999", true)]
    #[case("1.9999", true)]
    #[case("99999999", true)]
    #[case("999", false)]
    #[case("9999.1", false)]
    #[case("1.0", false)]
    fn scm_detection(#[case] input: &str, #[case] scm: bool) -> TestResult {
        assert_eq!(Version::new(input)?.is_scm(), scm);
        Ok(())
    }

    #[rstest]
    #[case("1.2.3-r4", "1.2.3", "r4")]
    #[case("1.2.3", "1.2.3", "r0")]
    fn revision_split(
        #[case] input: &str,
        #[case] without: &str,
        #[case] revision: &str,
    ) -> TestResult {
        let version = Version::new(input)?;
        assert_eq!(version.remove_revision().to_string(), without);
        assert_eq!(version.revision_only(), revision);
        Ok(())
    }

    #[rstest]
    #[case("1.02.3_alpha1_p-r7")]
    #[case("00")]
    #[case("1.0.9999")]
    fn display_round_trip(#[case] input: &str) -> TestResult {
        assert_eq!(Version::new(input)?.to_string(), input);
        Ok(())
    }

    /// Equal versions must hash identically.
    #[rstest]
    #[case("1-r0", "1")]
    #[case("01", "1")]
    #[case("1.010", "1.01")]
    #[case("1_p", "1_p0")]
    fn equal_versions_hash_identically(#[case] a: &str, #[case] b: &str) -> TestResult {
        use std::collections::hash_map::DefaultHasher;

        fn hash_of(version: &Version) -> u64 {
            let mut hasher = DefaultHasher::new();
            version.hash(&mut hasher);
            hasher.finish()
        }

        let a = Version::new(a)?;
        let b = Version::new(b)?;
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        Ok(())
    }

    const VERSION_REGEX: &str =
        r"[0-9]{1,6}(\.[0-9]{1,6}){0,3}[a-z]?(_(alpha|beta|pre|rc|p)([0-9]{1,4})?){0,2}(-r[0-9]{1,4})?";

    proptest! {
        /// For every pair of valid versions exactly one of `<`, `=`, `>` holds
        /// and comparison is antisymmetric.
        #[test]
        fn total_order_property(a in VERSION_REGEX, b in VERSION_REGEX) {
            let a = Version::new(&a).unwrap();
            let b = Version::new(&b).unwrap();
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a.cmp(&a), Ordering::Equal);
        }

        /// Printing a parsed version reproduces the input.
        #[test]
        fn print_parse_round_trip(input in VERSION_REGEX) {
            let version = Version::new(&input).unwrap();
            prop_assert_eq!(version.to_string(), input);
        }
    }
}

//! Package dependency specifications.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::Serialize;
use winnow::{
    ModalResult,
    Parser,
    combinator::{alt, cut_err, delimited, eof, opt, preceded, repeat, separated},
    error::{StrContext, StrContextValue},
    token::take_while,
};

use crate::{
    ChoiceName,
    Choices,
    Error,
    QualifiedPackageName,
    RepositoryName,
    Slot,
    SlotRequirement,
    Version,
};

/// The version operator of a package dependency specification.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum VersionOp {
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `=`, matching the exact version including its revision.
    Equal,
    /// `~`, matching the version with any revision.
    Tilde,
    /// `>=`
    GreaterEqual,
    /// `>`
    Greater,
}

impl VersionOp {
    /// Whether `candidate` satisfies the operator against `wanted`.
    pub fn matches(self, candidate: &Version, wanted: &Version) -> bool {
        match self {
            VersionOp::Less => candidate < wanted,
            VersionOp::LessEqual => candidate <= wanted,
            VersionOp::Equal => candidate == wanted,
            VersionOp::Tilde => candidate.cmp_without_revision(wanted).is_eq(),
            VersionOp::GreaterEqual => candidate >= wanted,
            VersionOp::Greater => candidate > wanted,
        }
    }
}

impl Display for VersionOp {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let text = match self {
            VersionOp::Less => "<",
            VersionOp::LessEqual => "<=",
            VersionOp::Equal => "=",
            VersionOp::Tilde => "~",
            VersionOp::GreaterEqual => ">=",
            VersionOp::Greater => ">",
        };
        write!(f, "{text}")
    }
}

/// The kind of a bracketed use requirement.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum UseRequirementKind {
    /// `[flag]`: the flag must be enabled on the candidate.
    Enabled,
    /// `[-flag]`: the flag must be disabled on the candidate.
    Disabled,
    /// `[flag=]`: the flag must match the state on the enabling package.
    EqualTo,
}

/// One bracketed use requirement of a package dependency specification.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct UseRequirement {
    /// The flag the requirement applies to.
    pub flag: ChoiceName,
    /// The kind of requirement.
    pub kind: UseRequirementKind,
}

impl UseRequirement {
    /// Whether the requirement is met by `candidate` choices, given the
    /// `enabling` package's choices (consulted for `[flag=]`).
    pub fn is_met(&self, candidate: &Choices, enabling: &Choices) -> bool {
        match self.kind {
            UseRequirementKind::Enabled => candidate.is_enabled(&self.flag),
            UseRequirementKind::Disabled => !candidate.is_enabled(&self.flag),
            UseRequirementKind::EqualTo => {
                candidate.is_enabled(&self.flag) == enabling.is_enabled(&self.flag)
            }
        }
    }
}

impl Display for UseRequirement {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.kind {
            UseRequirementKind::Enabled => write!(f, "{}", self.flag),
            UseRequirementKind::Disabled => write!(f, "-{}", self.flag),
            UseRequirementKind::EqualTo => write!(f, "{}=", self.flag),
        }
    }
}

/// The strength of a block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum BlockStrength {
    /// `!spec`: the blocked package may be uninstalled as part of the
    /// resolution.
    Weak,
    /// `!!spec`: the blocked package must not be installed at all.
    Strong,
}

/// A package dependency specification, e.g.
/// `>=dev-libs/openssl-3.0:0::gentoo[tls]`.
///
/// ## Examples
/// ```
/// use std::str::FromStr;
///
/// use espm_types::PackageDep;
///
/// # fn main() -> Result<(), espm_types::Error> {
/// let dep = PackageDep::from_str(">=dev-libs/openssl-3.0:0::gentoo[tls]")?;
/// assert_eq!(dep.name().to_string(), "dev-libs/openssl");
/// assert_eq!(dep.to_string(), ">=dev-libs/openssl-3.0:0::gentoo[tls]");
/// assert!(PackageDep::from_str("?bad/spec").is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct PackageDep {
    op: Option<VersionOp>,
    name: QualifiedPackageName,
    version: Option<Version>,
    slot: Option<SlotRequirement>,
    repository: Option<RepositoryName>,
    use_requirements: Vec<UseRequirement>,
}

impl PackageDep {
    /// Creates an unversioned, unconstrained spec for `name`.
    pub fn for_name(name: QualifiedPackageName) -> Self {
        Self {
            op: None,
            name,
            version: None,
            slot: None,
            repository: None,
            use_requirements: Vec::new(),
        }
    }

    /// Returns the qualified package name.
    pub fn name(&self) -> &QualifiedPackageName {
        &self.name
    }

    /// Returns the version operator, if any.
    pub fn op(&self) -> Option<VersionOp> {
        self.op
    }

    /// Returns the version, if any.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Returns the slot requirement, if any.
    pub fn slot(&self) -> Option<&SlotRequirement> {
        self.slot.as_ref()
    }

    /// Returns the repository restriction, if any.
    pub fn repository(&self) -> Option<&RepositoryName> {
        self.repository.as_ref()
    }

    /// Returns the bracketed use requirements.
    pub fn use_requirements(&self) -> &[UseRequirement] {
        &self.use_requirements
    }

    /// Returns a copy with the slot requirement replaced.
    pub fn with_slot(mut self, slot: SlotRequirement) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Whether `version`, `slot` and `repository` of a candidate satisfy the
    /// non-use parts of this spec.
    pub fn matches_version_slot_repo(
        &self,
        version: &Version,
        slot: Option<&Slot>,
        repository: &RepositoryName,
    ) -> bool {
        if let (Some(op), Some(wanted)) = (self.op, self.version.as_ref()) {
            if !op.matches(version, wanted) {
                return false;
            }
        }
        if let Some(requirement) = &self.slot {
            if !requirement.allows(slot) {
                return false;
            }
        }
        if let Some(wanted) = &self.repository {
            if wanted != repository {
                return false;
            }
        }
        true
    }

    /// Returns every use requirement not met by `candidate`, given the
    /// `enabling` package's choices.
    pub fn unmet_use_requirements(
        &self,
        candidate: &Choices,
        enabling: &Choices,
    ) -> Vec<&UseRequirement> {
        self.use_requirements
            .iter()
            .filter(|requirement| !requirement.is_met(candidate, enabling))
            .collect()
    }

    fn bad(input: &str, reason: impl Into<String>) -> Error {
        Error::BadSpec {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Parses a spec with an optional `!`/`!!` block prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadSpec`] as [`PackageDep::from_str`] does.
    pub fn parse_with_block(input: &str) -> Result<(Option<BlockStrength>, PackageDep), Error> {
        if let Some(rest) = input.strip_prefix("!!") {
            Ok((Some(BlockStrength::Strong), rest.parse()?))
        } else if let Some(rest) = input.strip_prefix('!') {
            Ok((Some(BlockStrength::Weak), rest.parse()?))
        } else {
            Ok((None, input.parse()?))
        }
    }

    /// Recognizes the `:slot`, `:*`, `:=` and `::repository` tail together
    /// with bracketed use requirements.
    fn tail_parser(
        input: &mut &str,
    ) -> ModalResult<(
        Vec<SlotRequirement>,
        Vec<String>,
        Vec<Vec<(bool, String, bool)>>,
    )> {
        fn slot_requirement(input: &mut &str) -> ModalResult<SlotRequirement> {
            alt((
                '*'.value(SlotRequirement::Any),
                '='.value(SlotRequirement::Rebuild),
                take_while(1.., |c: char| c != ':' && c != '[')
                    .try_map(|s: &str| Slot::new(s).map(SlotRequirement::Named)),
            ))
            .context(StrContext::Label("slot requirement"))
            .parse_next(input)
        }

        fn use_flag(input: &mut &str) -> ModalResult<(bool, String, bool)> {
            (
                opt('-').map(|minus| minus.is_some()),
                take_while(1.., |c: char| {
                    c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '@' | '.' | '-')
                }),
                opt('=').map(|equal| equal.is_some()),
            )
                .map(|(minus, flag, equal): (bool, &str, bool)| (minus, flag.to_string(), equal))
                .parse_next(input)
        }

        let mut slots = Vec::new();
        let mut repositories = Vec::new();

        loop {
            if input.starts_with("::") {
                let repo: &str = preceded(
                    "::",
                    cut_err(take_while(1.., |c: char| c != ':' && c != '[')).context(
                        StrContext::Expected(StrContextValue::Description("repository name")),
                    ),
                )
                .parse_next(input)?;
                repositories.push(repo.to_string());
            } else if input.starts_with(':') {
                let slot = preceded(':', cut_err(slot_requirement)).parse_next(input)?;
                slots.push(slot);
            } else {
                break;
            }
        }

        let brackets: Vec<Vec<(bool, String, bool)>> = repeat(
            0..,
            delimited(
                '[',
                cut_err(separated::<_, _, Vec<(bool, String, bool)>, _, _, _, _>(
                    1..,
                    use_flag,
                    ',',
                ))
                .context(StrContext::Expected(
                    StrContextValue::Description("use requirement list"),
                )),
                cut_err(']').context(StrContext::Expected(StrContextValue::CharLiteral(']'))),
            ),
        )
        .parse_next(input)?;

        eof.context(StrContext::Expected(StrContextValue::Description(
            "end of spec",
        )))
        .parse_next(input)?;

        Ok((slots, repositories, brackets))
    }
}

impl FromStr for PackageDep {
    type Err = Error;

    /// Parses the extended package dependency specification grammar.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadSpec`] on an unknown operator, an empty or invalid
    /// name, a missing or trailing version, multiple slot requirements, or
    /// conflicting use brackets.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.starts_with('!') {
            return Err(Self::bad(input, "block prefix is not allowed here"));
        }

        // Two-character operators have to be tried before their one-character
        // prefixes.
        let (op, rest) = if let Some(rest) = input.strip_prefix("<=") {
            (Some(VersionOp::LessEqual), rest)
        } else if let Some(rest) = input.strip_prefix(">=") {
            (Some(VersionOp::GreaterEqual), rest)
        } else if let Some(rest) = input.strip_prefix('<') {
            (Some(VersionOp::Less), rest)
        } else if let Some(rest) = input.strip_prefix('>') {
            (Some(VersionOp::Greater), rest)
        } else if let Some(rest) = input.strip_prefix('=') {
            (Some(VersionOp::Equal), rest)
        } else if let Some(rest) = input.strip_prefix('~') {
            (Some(VersionOp::Tilde), rest)
        } else {
            (None, input)
        };

        if rest.starts_with(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
            return Err(Self::bad(input, "unknown operator"));
        }

        let tail_start = rest.find([':', '[']).unwrap_or(rest.len());
        let (name_version, tail) = rest.split_at(tail_start);

        let (name, version) = if op.is_some() {
            // The version is the suffix after the first hyphen that parses as
            // a whole version.
            let split = name_version
                .match_indices('-')
                .find(|(index, _)| Version::new(&name_version[index + 1..]).is_ok())
                .map(|(index, _)| index);
            let Some(split) = split else {
                return Err(Self::bad(input, "operator requires a version"));
            };
            let name: QualifiedPackageName = name_version[..split]
                .parse()
                .map_err(|e: Error| Self::bad(input, e.to_string()))?;
            let version = Version::new(&name_version[split + 1..])
                .map_err(|e| Self::bad(input, e.to_string()))?;
            (name, Some(version))
        } else {
            let name: QualifiedPackageName = name_version
                .parse()
                .map_err(|e: Error| Self::bad(input, e.to_string()))?;
            (name, None)
        };

        let (slots, repositories, brackets) = Self::tail_parser
            .parse(tail)
            .map_err(|e| Self::bad(input, e.inner().to_string()))?;

        if slots.len() > 1 {
            return Err(Self::bad(input, "multiple slot requirements"));
        }
        if repositories.len() > 1 {
            return Err(Self::bad(input, "multiple repository restrictions"));
        }

        let repository = repositories
            .first()
            .map(|name| RepositoryName::new(name))
            .transpose()
            .map_err(|e| Self::bad(input, e.to_string()))?;

        let mut use_requirements: Vec<UseRequirement> = Vec::new();
        for (minus, flag, equal) in brackets.into_iter().flatten() {
            let kind = match (minus, equal) {
                (true, false) => UseRequirementKind::Disabled,
                (false, true) => UseRequirementKind::EqualTo,
                (false, false) => UseRequirementKind::Enabled,
                (true, true) => {
                    return Err(Self::bad(input, "use requirement cannot be both -flag and flag="));
                }
            };
            let flag = ChoiceName::new(&flag).map_err(|e| Self::bad(input, e.to_string()))?;
            if use_requirements.iter().any(|existing| {
                existing.flag == flag
                    && matches!(
                        (existing.kind, kind),
                        (UseRequirementKind::Enabled, UseRequirementKind::Disabled)
                            | (UseRequirementKind::Disabled, UseRequirementKind::Enabled)
                    )
            }) {
                return Err(Self::bad(input, format!("conflicting brackets for {flag}")));
            }
            use_requirements.push(UseRequirement { flag, kind });
        }

        Ok(PackageDep {
            op,
            name,
            version,
            slot: slots.into_iter().next(),
            repository,
            use_requirements,
        })
    }
}

impl Display for PackageDep {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if let Some(op) = self.op {
            write!(f, "{op}")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, "-{version}")?;
        }
        if let Some(slot) = &self.slot {
            write!(f, "{slot}")?;
        }
        if let Some(repository) = &self.repository {
            write!(f, "::{repository}")?;
        }
        if !self.use_requirements.is_empty() {
            write!(f, "[")?;
            for (index, requirement) in self.use_requirements.iter().enumerate() {
                if index > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{requirement}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    #[rstest]
    #[case("cat/pkg")]
    #[case(">=cat/pkg-1.2.3")]
    #[case("<cat/pkg-2")]
    #[case("~cat/pkg-1.0")]
    #[case("=cat/pkg-1.2.3-r1")]
    #[case("cat/pkg:2")]
    #[case("cat/pkg:*")]
    #[case("cat/pkg:=")]
    #[case("cat/pkg::gentoo")]
    #[case(">=cat/pkg-1:2::gentoo")]
    #[case("cat/pkg[ssl]")]
    #[case("cat/pkg[ssl,-doc,threads=]")]
    #[case(">=cat/pkg-1.2:0::repo[ssl,-doc]")]
    fn display_round_trip(#[case] input: &str) -> TestResult {
        assert_eq!(PackageDep::from_str(input)?.to_string(), input);
        Ok(())
    }

    #[rstest]
    #[case("", "empty")]
    #[case("?cat/pkg", "unknown operator")]
    #[case("=>cat/pkg-1", "unknown operator")]
    #[case(">=cat/pkg", "missing version")]
    #[case("cat/pkg-1.2", "version without operator")]
    #[case("cat/pkg:1:2", "multiple slots")]
    #[case("cat/pkg[ssl][-ssl]", "conflicting brackets")]
    #[case("cat/pkg[]", "empty bracket")]
    #[case("!cat/pkg", "block prefix")]
    #[case("cat/pkg::", "empty repository")]
    fn bad_specs(#[case] input: &str, #[case] _why: &str) {
        assert!(matches!(
            PackageDep::from_str(input),
            Err(Error::BadSpec { .. })
        ));
    }

    #[rstest]
    fn parts_are_exposed() -> TestResult {
        let dep = PackageDep::from_str(">=dev-libs/openssl-3.0:0::gentoo[tls]")?;
        assert_eq!(dep.op(), Some(VersionOp::GreaterEqual));
        assert_eq!(dep.version(), Some(&Version::new("3.0")?));
        assert_eq!(
            dep.slot(),
            Some(&SlotRequirement::Named(Slot::new("0")?))
        );
        assert_eq!(dep.repository(), Some(&RepositoryName::new("gentoo")?));
        assert_eq!(dep.use_requirements().len(), 1);
        Ok(())
    }

    #[rstest]
    #[case("!cat/pkg", Some(BlockStrength::Weak))]
    #[case("!!cat/pkg", Some(BlockStrength::Strong))]
    #[case("cat/pkg", None)]
    fn block_prefixes(#[case] input: &str, #[case] strength: Option<BlockStrength>) -> TestResult {
        let (block, dep) = PackageDep::parse_with_block(input)?;
        assert_eq!(block, strength);
        assert_eq!(dep.name().to_string(), "cat/pkg");
        Ok(())
    }

    #[rstest]
    #[case("=cat/pkg-1", "1", true)]
    #[case("=cat/pkg-1", "1-r1", false)]
    #[case("~cat/pkg-1", "1-r1", true)]
    #[case("~cat/pkg-1", "1.1", false)]
    #[case(">=cat/pkg-2", "1.9", false)]
    #[case(">=cat/pkg-2", "2", true)]
    #[case("<cat/pkg-2", "1.9", true)]
    fn version_matching(
        #[case] spec: &str,
        #[case] version: &str,
        #[case] matches: bool,
    ) -> TestResult {
        let dep = PackageDep::from_str(spec)?;
        let repo = RepositoryName::new("test")?;
        assert_eq!(
            dep.matches_version_slot_repo(&Version::new(version)?, None, &repo),
            matches
        );
        Ok(())
    }

    /// A name containing hyphens splits at the version, not inside the name.
    #[rstest]
    fn hyphenated_name_version_split() -> TestResult {
        let dep = PackageDep::from_str("=app-misc/foo-bar-baz-2.0c_pre1-r3")?;
        assert_eq!(dep.name().to_string(), "app-misc/foo-bar-baz");
        assert_eq!(dep.version(), Some(&Version::new("2.0c_pre1-r3")?));
        Ok(())
    }
}

//! Immutable package identifiers.

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use strum::Display as StrumDisplay;

use crate::{
    Choices,
    DepTree,
    DependenciesClass,
    Error,
    Keyword,
    QualifiedPackageName,
    RepositoryName,
    Slot,
    Version,
    parse_dependency_string,
};

/// The kind of a mask on a package id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum MaskKind {
    /// Masked because no keyword is accepted.
    Keyword,
    /// Masked by user configuration.
    User,
    /// Masked by the repository.
    Repository,
    /// Masked because the licence is not accepted.
    License,
}

/// A mask making a package id unselectable, with its human readable reason.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mask {
    /// The kind of mask.
    pub kind: MaskKind,
    /// A human readable explanation.
    pub explanation: String,
}

impl Display for Mask {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} ({})", self.kind, self.explanation)
    }
}

/// A lazily parsed dependency metadata key.
///
/// The raw metadata text is kept; the tree is parsed on first access.
#[derive(Debug)]
pub struct DependenciesKey {
    class: DependenciesClass,
    raw: String,
    parsed: OnceLock<Result<Vec<DepTree>, Error>>,
}

impl DependenciesKey {
    /// Creates a new, unevaluated [`DependenciesKey`].
    pub fn new(class: DependenciesClass, raw: impl Into<String>) -> Self {
        Self {
            class,
            raw: raw.into(),
            parsed: OnceLock::new(),
        }
    }

    /// Returns the metadata class of the key.
    pub fn class(&self) -> DependenciesClass {
        self.class
    }

    /// Returns the raw metadata text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the key has been evaluated yet.
    pub fn is_evaluated(&self) -> bool {
        self.parsed.get().is_some()
    }

    /// Returns the parsed tree nodes, evaluating the key on first access.
    ///
    /// # Errors
    ///
    /// Returns the parse error for malformed metadata, on every access.
    pub fn value(&self) -> Result<&[DepTree], Error> {
        self.parsed
            .get_or_init(|| parse_dependency_string(self.class, &self.raw))
            .as_ref()
            .map(Vec::as_slice)
            .map_err(Clone::clone)
    }
}

/// An immutable handle to one installable or installed package version.
///
/// Identity is the canonical form `cat/pkg-ver:slot::repo` plus the
/// installed flag; two ids with equal identity compare equal regardless of
/// metadata.
///
/// ## Examples
/// ```
/// use espm_types::{PackageId, QualifiedPackageName, RepositoryName, Slot, Version};
///
/// # fn main() -> Result<(), espm_types::Error> {
/// let id = PackageId::builder(
///     "sys-apps/coreutils".parse()?,
///     Version::new("9.4-r1")?,
///     RepositoryName::new("gentoo")?,
/// )
/// .with_slot(Slot::new("0")?)
/// .build();
/// assert_eq!(id.canonical_form(), "sys-apps/coreutils-9.4-r1:0::gentoo");
/// assert!(!id.is_installed());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PackageId {
    name: QualifiedPackageName,
    version: Version,
    slot: Option<Slot>,
    repository: RepositoryName,
    eapi: String,
    installed: bool,
    transient: bool,
    installed_time: Option<i64>,
    keywords: Vec<Keyword>,
    masks: Vec<Mask>,
    choices: Choices,
    dependencies: Vec<DependenciesKey>,
    ebuild_path: Option<PathBuf>,
}

impl PackageId {
    /// Starts building a [`PackageId`] from its mandatory fields.
    pub fn builder(
        name: QualifiedPackageName,
        version: Version,
        repository: RepositoryName,
    ) -> PackageIdBuilder {
        PackageIdBuilder {
            id: PackageId {
                name,
                version,
                slot: None,
                repository,
                eapi: "0".to_string(),
                installed: false,
                transient: false,
                installed_time: None,
                keywords: Vec::new(),
                masks: Vec::new(),
                choices: Choices::default(),
                dependencies: Vec::new(),
                ebuild_path: None,
            },
        }
    }

    /// Returns the qualified package name.
    pub fn name(&self) -> &QualifiedPackageName {
        &self.name
    }

    /// Returns the version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Returns the slot, if the id carries one.
    pub fn slot(&self) -> Option<&Slot> {
        self.slot.as_ref()
    }

    /// Returns the repository the id lives in.
    pub fn repository(&self) -> &RepositoryName {
        &self.repository
    }

    /// Returns the EAPI string.
    pub fn eapi(&self) -> &str {
        &self.eapi
    }

    /// Whether the id refers to an installed package.
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Whether the id is transient (installed only as a side effect and
    /// replaceable without further thought).
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Returns the installation time; always set when installed.
    pub fn installed_time(&self) -> Option<i64> {
        self.installed_time
    }

    /// Returns the keywords.
    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    /// Returns the masks on the id.
    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    /// Whether any mask applies.
    pub fn is_masked(&self) -> bool {
        !self.masks.is_empty()
    }

    /// Returns the choices of the id.
    pub fn choices(&self) -> &Choices {
        &self.choices
    }

    /// Returns the dependency key of `class`, if the id carries one.
    pub fn dependencies(&self, class: DependenciesClass) -> Option<&DependenciesKey> {
        self.dependencies.iter().find(|key| key.class() == class)
    }

    /// Returns every dependency key the id carries.
    pub fn dependency_keys(&self) -> &[DependenciesKey] {
        &self.dependencies
    }

    /// Returns the path of the ebuild backing this id, if any.
    pub fn ebuild_path(&self) -> Option<&Path> {
        self.ebuild_path.as_deref()
    }

    /// Whether the id flags an unstable development head, either by version
    /// (`9999`) or by name convention.
    pub fn is_scm(&self) -> bool {
        self.version.is_scm() || self.name.package().is_scm_by_convention()
    }

    /// Returns the canonical printed form, `cat/pkg-ver:slot::repo` (the
    /// slot is omitted when the id has none).
    pub fn canonical_form(&self) -> String {
        self.to_string()
    }

    /// Splits a canonical form back into its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` is not of the form produced by
    /// [`PackageId::canonical_form`].
    pub fn canonical_parts(
        input: &str,
    ) -> Result<(QualifiedPackageName, Version, Option<Slot>, RepositoryName), Error> {
        let bad = |reason: &str| Error::InvalidPackageId {
            id: input.to_string(),
            reason: reason.to_string(),
        };

        let (rest, repository) = input
            .rsplit_once("::")
            .ok_or_else(|| bad("missing ::repository"))?;
        let repository = RepositoryName::new(repository)?;

        let (name_version, slot) = match rest.rsplit_once(':') {
            Some((name_version, slot)) => (name_version, Some(Slot::new(slot)?)),
            None => (rest, None),
        };

        let split = name_version
            .match_indices('-')
            .find(|(index, _)| Version::new(&name_version[index + 1..]).is_ok())
            .map(|(index, _)| index)
            .ok_or_else(|| bad("missing version"))?;
        let name: QualifiedPackageName = name_version[..split].parse()?;
        let version = Version::new(&name_version[split + 1..])?;

        Ok((name, version, slot, repository))
    }
}

impl Display for PackageId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)?;
        if let Some(slot) = &self.slot {
            write!(f, ":{slot}")?;
        }
        write!(f, "::{}", self.repository)
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.slot == other.slot
            && self.repository == other.repository
            && self.installed == other.installed
    }
}

impl Eq for PackageId {}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
        self.slot.hash(state);
        self.repository.hash(state);
        self.installed.hash(state);
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.slot.cmp(&other.slot))
            .then_with(|| self.repository.cmp(&other.repository))
            .then_with(|| self.installed.cmp(&other.installed))
    }
}

/// Builder for [`PackageId`].
#[derive(Debug)]
pub struct PackageIdBuilder {
    id: PackageId,
}

impl PackageIdBuilder {
    /// Sets the slot.
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.id.slot = Some(slot);
        self
    }

    /// Sets the EAPI string.
    pub fn with_eapi(mut self, eapi: impl Into<String>) -> Self {
        self.id.eapi = eapi.into();
        self
    }

    /// Marks the id as installed at `time` (seconds since the epoch).
    ///
    /// Installed ids always carry an installation time.
    pub fn installed_at(mut self, time: i64) -> Self {
        self.id.installed = true;
        self.id.installed_time = Some(time);
        self
    }

    /// Marks the id as transient.
    pub fn transient(mut self) -> Self {
        self.id.transient = true;
        self
    }

    /// Sets the keywords.
    pub fn with_keywords(mut self, keywords: Vec<Keyword>) -> Self {
        self.id.keywords = keywords;
        self
    }

    /// Adds a mask.
    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.id.masks.push(mask);
        self
    }

    /// Sets the choices.
    pub fn with_choices(mut self, choices: Choices) -> Self {
        self.id.choices = choices;
        self
    }

    /// Adds a dependency key from raw metadata text.
    pub fn with_dependencies(mut self, class: DependenciesClass, raw: impl Into<String>) -> Self {
        self.id.dependencies.push(DependenciesKey::new(class, raw));
        self
    }

    /// Sets the backing ebuild path.
    pub fn with_ebuild_path(mut self, path: PathBuf) -> Self {
        self.id.ebuild_path = Some(path);
        self
    }

    /// Finishes the id.
    pub fn build(self) -> PackageId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;

    fn id(canonical: &str) -> PackageId {
        let (name, version, slot, repository) = PackageId::canonical_parts(canonical).unwrap();
        let mut builder = PackageId::builder(name, version, repository);
        if let Some(slot) = slot {
            builder = builder.with_slot(slot);
        }
        builder.build()
    }

    #[rstest]
    #[case("sys-apps/coreutils-9.4-r1:0::gentoo")]
    #[case("dev-lang/python-3.12.1:3.12::gentoo")]
    #[case("virtual/libc-1::installed")]
    fn canonical_round_trip(#[case] canonical: &str) {
        assert_eq!(id(canonical).canonical_form(), canonical);
    }

    #[rstest]
    #[case("sys-apps/coreutils")]
    #[case("sys-apps/coreutils-9.4")]
    #[case("sys-apps/coreutils:0::gentoo")]
    fn bad_canonical(#[case] input: &str) {
        assert!(PackageId::canonical_parts(input).is_err());
    }

    #[rstest]
    fn lazy_dependencies_evaluate_once() -> TestResult {
        let id = PackageId::builder(
            "cat/pkg".parse()?,
            Version::new("1")?,
            RepositoryName::new("test")?,
        )
        .with_dependencies(DependenciesClass::Build, "cat/dep ssl? ( cat/ssl )")
        .build();

        let key = id.dependencies(DependenciesClass::Build).expect("key");
        assert!(!key.is_evaluated());
        assert_eq!(key.value()?.len(), 2);
        assert!(key.is_evaluated());
        assert_eq!(key.value()?.len(), 2);
        Ok(())
    }

    #[rstest]
    fn installed_carries_time() -> TestResult {
        let id = PackageId::builder(
            "cat/pkg".parse()?,
            Version::new("1")?,
            RepositoryName::new("installed")?,
        )
        .installed_at(1_700_000_000)
        .build();
        assert!(id.is_installed());
        assert_eq!(id.installed_time(), Some(1_700_000_000));
        Ok(())
    }

    #[rstest]
    fn identity_ignores_metadata() -> TestResult {
        let a = PackageId::builder(
            "cat/pkg".parse()?,
            Version::new("1")?,
            RepositoryName::new("test")?,
        )
        .with_eapi("8")
        .build();
        let b = PackageId::builder(
            "cat/pkg".parse()?,
            Version::new("1")?,
            RepositoryName::new("test")?,
        )
        .with_dependencies(DependenciesClass::Run, "cat/dep")
        .build();
        assert_eq!(a, b);
        Ok(())
    }
}

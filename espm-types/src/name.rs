//! Category, package and repository names.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::Serialize;

use crate::{Error, Version};

/// Package name parts that flag an unstable development head by convention.
const SCM_NAME_SUFFIXES: &[&str] = &["-scm", "-live", "-cvs", "-svn", "-darcs"];

fn valid_name(input: &str, extra: &[char]) -> bool {
    let mut chars = input.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphanumeric() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '-' || extra.contains(&c))
}

/// The category half of a qualified package name, e.g. `sys-apps`.
///
/// A category name starts with an alphanumeric character or `_` and continues
/// with alphanumerics, `_`, `+`, `-` or `.`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CategoryName(String);

impl CategoryName {
    /// Creates a new [`CategoryName`] from a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` does not follow the category name alphabet.
    pub fn new(name: &str) -> Result<Self, Error> {
        if valid_name(name, &['.']) {
            Ok(CategoryName(name.to_string()))
        } else {
            Err(Error::InvalidCategoryName(name.to_string()))
        }
    }

    /// Returns a reference to the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CategoryName {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        CategoryName::new(input)
    }
}

impl Display for CategoryName {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The package half of a qualified package name, e.g. `coreutils`.
///
/// Uses the category name alphabet without `.`, and must not end in a hyphen
/// followed by a valid version (such a name would be indistinguishable from a
/// versioned file name).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PackageNamePart(String);

impl PackageNamePart {
    /// Creates a new [`PackageNamePart`] from a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` does not follow the package name alphabet
    /// or ends in a hyphen followed by a valid version.
    pub fn new(name: &str) -> Result<Self, Error> {
        if !valid_name(name, &[]) {
            return Err(Error::InvalidPackageName(name.to_string()));
        }
        for (index, _) in name.match_indices('-') {
            if Version::new(&name[index + 1..]).is_ok() {
                return Err(Error::InvalidPackageName(name.to_string()));
            }
        }
        Ok(PackageNamePart(name.to_string()))
    }

    /// Returns a reference to the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name flags an unstable development head by convention
    /// (`-scm`, `-live`, `-cvs`, `-svn`, `-darcs`).
    pub fn is_scm_by_convention(&self) -> bool {
        SCM_NAME_SUFFIXES.iter().any(|s| self.0.ends_with(s))
    }
}

impl FromStr for PackageNamePart {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        PackageNamePart::new(input)
    }
}

impl Display for PackageNamePart {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully qualified package name: a category and a package, e.g.
/// `sys-apps/coreutils`.
///
/// ## Examples
/// ```
/// use std::str::FromStr;
///
/// use espm_types::QualifiedPackageName;
///
/// # fn main() -> Result<(), espm_types::Error> {
/// let name = QualifiedPackageName::from_str("sys-apps/coreutils")?;
/// assert_eq!(name.category().as_str(), "sys-apps");
/// assert_eq!(name.package().as_str(), "coreutils");
/// assert_eq!(name.to_string(), "sys-apps/coreutils");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct QualifiedPackageName {
    category: CategoryName,
    package: PackageNamePart,
}

impl QualifiedPackageName {
    /// Creates a new [`QualifiedPackageName`] from its two halves.
    pub fn new(category: CategoryName, package: PackageNamePart) -> Self {
        Self { category, package }
    }

    /// Returns a reference to the category.
    pub fn category(&self) -> &CategoryName {
        &self.category
    }

    /// Returns a reference to the package part.
    pub fn package(&self) -> &PackageNamePart {
        &self.package
    }
}

impl FromStr for QualifiedPackageName {
    type Err = Error;

    /// Creates a [`QualifiedPackageName`] from a `category/package` string.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no single `/` separator or either half is
    /// invalid.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let Some((category, package)) = input.split_once('/') else {
            return Err(Error::InvalidQualifiedPackageName(input.to_string()));
        };
        if package.contains('/') {
            return Err(Error::InvalidQualifiedPackageName(input.to_string()));
        }
        Ok(Self {
            category: CategoryName::new(category)?,
            package: PackageNamePart::new(package)?,
        })
    }
}

impl Display for QualifiedPackageName {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.package)
    }
}

/// The name of a repository, e.g. `gentoo` or `installed`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct RepositoryName(String);

impl RepositoryName {
    /// Creates a new [`RepositoryName`] from a string slice.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty or contains characters outside the
    /// repository name alphabet.
    pub fn new(name: &str) -> Result<Self, Error> {
        if valid_name(name, &[]) {
            Ok(RepositoryName(name.to_string()))
        } else {
            Err(Error::InvalidRepositoryName(name.to_string()))
        }
    }

    /// Returns a reference to the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RepositoryName {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        RepositoryName::new(input)
    }
}

impl Display for RepositoryName {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! The package universe query interface.

use std::sync::Arc;

use espm_types::{CategoryName, PackageDep, PackageId, QualifiedPackageName, RepositoryName};
use strum::{Display as StrumDisplay, EnumString};

use crate::Error;

/// Where a resolution installs to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, StrumDisplay, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DestinationType {
    /// Install into the live root filesystem.
    InstallToSlash,
    /// Create a binary package instead of installing.
    CreateBinary,
}

/// Queries over every repository the session can see.
///
/// The universe is implemented outside the core (repository readers, the
/// installed package database); the resolver and executor only consume these
/// queries. Implementations are read-only from the core's point of view.
pub trait PackageUniverse {
    /// Returns every known category, sorted.
    fn categories(&self) -> Vec<CategoryName>;

    /// Returns every known package name in `category`, sorted.
    fn package_names(&self, category: &CategoryName) -> Vec<QualifiedPackageName>;

    /// Returns every id of `name` across all repositories, sorted by
    /// version, then repository.
    fn ids(&self, name: &QualifiedPackageName) -> Vec<Arc<PackageId>>;

    /// Returns every installed id of `name`.
    fn installed_ids(&self, name: &QualifiedPackageName) -> Vec<Arc<PackageId>> {
        self.ids(name)
            .into_iter()
            .filter(|id| id.is_installed())
            .collect()
    }

    /// Returns every id matching the version, slot and repository parts of
    /// `spec`.
    fn matching_ids(&self, spec: &PackageDep) -> Vec<Arc<PackageId>> {
        self.ids(spec.name())
            .into_iter()
            .filter(|id| {
                spec.matches_version_slot_repo(id.version(), id.slot(), id.repository())
            })
            .collect()
    }

    /// Expands a named set into its member specs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchSet`] if the universe has no set of that name.
    fn set(&self, name: &str) -> Result<Vec<PackageDep>, Error>;

    /// Returns the repository installs of the given kind go to, if one is
    /// configured.
    fn repository_for(&self, destination: DestinationType) -> Option<RepositoryName>;

    /// Looks an id up by its canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchId`] if no id prints as `canonical`.
    fn id_by_canonical_form(&self, canonical: &str) -> Result<Arc<PackageId>, Error> {
        let (name, _, _, _) = PackageId::canonical_parts(canonical)?;
        self.ids(&name)
            .into_iter()
            .find(|id| id.canonical_form() == canonical)
            .ok_or_else(|| Error::NoSuchId(canonical.to_string()))
    }
}

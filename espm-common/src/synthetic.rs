//! An in-memory universe for tests.

use std::{collections::BTreeMap, sync::Arc};

use espm_types::{CategoryName, PackageDep, PackageId, QualifiedPackageName, RepositoryName};

use crate::{DestinationType, Error, PackageUniverse};

/// A [`PackageUniverse`] backed by plain collections.
///
/// Used by tests throughout the workspace: ids are added up front, sets are
/// plain lists, and the destination repositories are fixed names.
#[derive(Debug)]
pub struct SyntheticUniverse {
    ids: Vec<Arc<PackageId>>,
    sets: BTreeMap<String, Vec<PackageDep>>,
    slash_repository: RepositoryName,
    binary_repository: Option<RepositoryName>,
}

impl SyntheticUniverse {
    /// Creates an empty universe installing to `slash_repository`.
    pub fn new(slash_repository: RepositoryName) -> Self {
        Self {
            ids: Vec::new(),
            sets: BTreeMap::new(),
            slash_repository,
            binary_repository: None,
        }
    }

    /// Creates an empty universe with the conventional `installed`
    /// destination repository.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the conventional name is valid.
    pub fn with_conventional_destination() -> Result<Self, Error> {
        Ok(Self::new(RepositoryName::new("installed")?))
    }

    /// Adds an id.
    pub fn add(&mut self, id: PackageId) -> Arc<PackageId> {
        let id = Arc::new(id);
        self.ids.push(Arc::clone(&id));
        self.ids.sort();
        id
    }

    /// Defines a named set.
    pub fn add_set(&mut self, name: impl Into<String>, members: Vec<PackageDep>) {
        self.sets.insert(name.into(), members);
    }

    /// Sets the repository binary creation installs into.
    pub fn set_binary_repository(&mut self, repository: RepositoryName) {
        self.binary_repository = Some(repository);
    }
}

impl PackageUniverse for SyntheticUniverse {
    fn categories(&self) -> Vec<CategoryName> {
        let mut categories: Vec<CategoryName> = self
            .ids
            .iter()
            .map(|id| id.name().category().clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    fn package_names(&self, category: &CategoryName) -> Vec<QualifiedPackageName> {
        let mut names: Vec<QualifiedPackageName> = self
            .ids
            .iter()
            .filter(|id| id.name().category() == category)
            .map(|id| id.name().clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn ids(&self, name: &QualifiedPackageName) -> Vec<Arc<PackageId>> {
        self.ids
            .iter()
            .filter(|id| id.name() == name)
            .cloned()
            .collect()
    }

    fn set(&self, name: &str) -> Result<Vec<PackageDep>, Error> {
        self.sets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NoSuchSet(name.to_string()))
    }

    fn repository_for(&self, destination: DestinationType) -> Option<RepositoryName> {
        match destination {
            DestinationType::InstallToSlash => Some(self.slash_repository.clone()),
            DestinationType::CreateBinary => self.binary_repository.clone(),
        }
    }
}

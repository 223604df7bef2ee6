//! Session-wide context.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use espm_common::{FileHashes, Notifier};
use espm_merge::hash_file;

use crate::Error;

/// Values that live for one session and are threaded explicitly instead of
/// living in process globals: the log level, the memoised file hash cache,
/// the recognised ebuild file suffixes, and the notifier.
///
/// The hash cache is scoped to the context; it dies with the session.
#[derive(Debug)]
pub struct SessionContext {
    /// The log level the session runs with.
    pub log_level: log::LevelFilter,
    /// The file suffixes recognised as ebuilds.
    pub ebuild_suffixes: Vec<String>,
    /// The notifier observing resolver and executor progress.
    pub notifier: Notifier,
    memoised_hashes: RefCell<BTreeMap<PathBuf, FileHashes>>,
}

impl SessionContext {
    /// Creates a context with the given log level and a silent notifier.
    pub fn new(log_level: log::LevelFilter) -> Self {
        Self {
            log_level,
            ebuild_suffixes: vec!["ebuild".to_string()],
            notifier: Notifier::silent(),
            memoised_hashes: RefCell::new(BTreeMap::new()),
        }
    }

    /// Replaces the notifier.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Hashes `path`, remembering the result for the rest of the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn memoised_hash(&self, path: &Path) -> Result<FileHashes, Error> {
        if let Some(hashes) = self.memoised_hashes.borrow().get(path) {
            return Ok(hashes.clone());
        }
        let (_, hashes) = hash_file(path)?;
        self.memoised_hashes
            .borrow_mut()
            .insert(path.to_path_buf(), hashes.clone());
        Ok(hashes)
    }

    /// Whether a file name carries one of the recognised ebuild suffixes.
    pub fn is_ebuild_name(&self, name: &str) -> bool {
        self.ebuild_suffixes
            .iter()
            .any(|suffix| name.ends_with(&format!(".{suffix}")))
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(log::LevelFilter::Warn)
    }
}

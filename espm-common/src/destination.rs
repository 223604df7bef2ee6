//! The merge destination interface and its journal types.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

use espm_types::{PackageId, RepositoryName};

use crate::Error;

/// Checksums of a merged regular file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileHashes {
    /// The MD5 checksum, hex encoded.
    pub md5: String,
    /// The RMD160 checksum, hex encoded.
    pub rmd160: String,
    /// The SHA1 checksum, hex encoded.
    pub sha1: String,
    /// The SHA256 checksum, hex encoded.
    pub sha256: String,
}

/// The kind of one journalled filesystem entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// A directory.
    Dir,
    /// A regular file with its size and checksums.
    File {
        /// The file size in bytes.
        size: u64,
        /// The checksums of the merged content.
        hashes: FileHashes,
    },
    /// A symbolic link with its target.
    Sym {
        /// The link target, verbatim.
        target: String,
    },
    /// A named pipe.
    Fifo,
    /// A device node.
    Dev,
    /// Anything else (sockets and friends).
    Other,
}

/// One journalled filesystem entry of a merge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JournalEntry {
    /// The absolute install path of the entry.
    pub path: PathBuf,
    /// What was merged at the path.
    pub kind: EntryKind,
    /// The modification time recorded for the entry, seconds since the
    /// epoch.
    pub mtime: i64,
}

/// The journal of one merge: every final path with its kind and checksums.
///
/// A destination persists the journal as the installed id's contents record
/// and uses it to re-attempt or roll back an interrupted merge.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeJournal {
    entries: Vec<JournalEntry>,
}

impl MergeJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal from recorded entries.
    pub fn from_entries(entries: Vec<JournalEntry>) -> Self {
        Self { entries }
    }

    /// Appends one entry.
    pub fn record(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Returns the recorded entries in merge order.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Whether `path` was merged.
    pub fn contains_path(&self, path: &Path) -> bool {
        self.entries.iter().any(|entry| entry.path == path)
    }
}

/// The interface a merge writes through.
///
/// Implemented by the installed package database; the merger and executor
/// only consume it.
pub trait Destination: Debug {
    /// The repository name installs through this destination appear under.
    fn repository(&self) -> &RepositoryName;

    /// Records a merged id together with its journal and the captured build
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn record_install(
        &self,
        id: &PackageId,
        journal: &MergeJournal,
        environment: Option<&str>,
        build_start_time: i64,
    ) -> Result<(), Error>;

    /// Returns the journal recorded for an installed id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInstalledHere`] if the id has no record.
    fn recorded_contents(&self, id: &PackageId) -> Result<MergeJournal, Error>;

    /// Removes an installed id's recorded paths from the filesystem and
    /// drops its record.
    ///
    /// Paths for which `ignore_for_unmerge` returns `true` are left alone;
    /// a replacing merge passes its own journal's path set here.
    ///
    /// # Errors
    ///
    /// Returns an error if the id has no record or a path cannot be removed.
    fn unmerge(
        &self,
        id: &PackageId,
        ignore_for_unmerge: &dyn Fn(&JournalEntry) -> bool,
    ) -> Result<(), Error>;

    /// Returns the canonical form of the installed id owning `path`, if any.
    fn owner_of(&self, path: &Path) -> Option<String>;
}

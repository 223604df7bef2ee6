//! The installed package database layout.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bzip2::{Compression, read::BzDecoder, write::BzEncoder};
use espm_common::{
    Destination,
    EntryKind,
    Error as CommonError,
    FileHashes,
    JournalEntry,
    MergeJournal,
};
use espm_types::{
    ChoiceName,
    ChoiceSet,
    ChoiceValue,
    Choices,
    DependenciesClass,
    Keyword,
    PackageId,
    QualifiedPackageName,
    RepositoryName,
    Slot,
    Version,
};

use crate::{ContentsEntry, ContentsFile, Error, VdbLock};

/// The metadata classes persisted per installed version.
const RECORDED_CLASSES: &[DependenciesClass] = &[
    DependenciesClass::Build,
    DependenciesClass::Run,
    DependenciesClass::Post,
    DependenciesClass::Provide,
    DependenciesClass::License,
];

/// The installed package database.
///
/// One directory per installed version under
/// `<root>/<category>/<package>-<version>/`, holding the captured metadata
/// files (`EAPI`, `SLOT`, `USE`, `IUSE`, the dependency variables,
/// `KEYWORDS`, `LICENSE`), the `CONTENTS` record, the compressed build
/// environment and the `BUILD_TIME`/`INSTALLED_TIME` stamps.
#[derive(Debug)]
pub struct Vdb {
    root: PathBuf,
    repository: RepositoryName,
}

impl Vdb {
    /// Opens (creating if needed) a database at `root`, whose installed ids
    /// appear under `repository`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created.
    pub fn open(root: impl Into<PathBuf>, repository: RepositoryName) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| Error::io(&root, "creating the database root", e))?;
        Ok(Self { root, repository })
    }

    /// Returns the database root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the repository name installed ids appear under.
    pub fn repository_name(&self) -> &RepositoryName {
        &self.repository
    }

    /// Takes the process-exclusive database lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn lock(&self) -> Result<VdbLock, Error> {
        VdbLock::acquire(&self.root)
    }

    /// The record directory of an id.
    fn record_dir(&self, name: &QualifiedPackageName, version: &Version) -> PathBuf {
        self.root
            .join(name.category().as_str())
            .join(format!("{}-{version}", name.package()))
    }

    /// Whether the database has a record for `id`'s name and version.
    pub fn has_record(&self, id: &PackageId) -> bool {
        self.record_dir(id.name(), id.version()).is_dir()
    }

    /// Reads every installed id.
    ///
    /// # Errors
    ///
    /// Returns an error on an unreadable or malformed record.
    pub fn installed_ids(&self) -> Result<Vec<PackageId>, Error> {
        let mut ids = Vec::new();
        for category in read_dir_sorted(&self.root)? {
            if !category.is_dir() {
                continue;
            }
            let Some(category_name) = file_name_str(&category) else {
                continue;
            };
            let category_name = CategoryNameBuf::parse(category_name, &category)?;
            for record in read_dir_sorted(&category)? {
                if !record.is_dir() {
                    continue;
                }
                ids.push(self.read_record(&category_name, &record)?);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Reads one record directory back into a [`PackageId`].
    fn read_record(
        &self,
        category: &CategoryNameBuf,
        dir: &Path,
    ) -> Result<PackageId, Error> {
        let malformed = |reason: &str| Error::MalformedRecord {
            path: dir.to_path_buf(),
            reason: reason.to_string(),
        };

        let Some(dir_name) = file_name_str(dir) else {
            return Err(malformed("record directory name is not valid unicode"));
        };
        let split = dir_name
            .match_indices('-')
            .find(|(index, _)| Version::new(&dir_name[index + 1..]).is_ok())
            .map(|(index, _)| index)
            .ok_or_else(|| malformed("record directory name carries no version"))?;
        let name: QualifiedPackageName =
            format!("{}/{}", category.0, &dir_name[..split]).parse()?;
        let version = Version::new(&dir_name[split + 1..])?;

        let installed_time: i64 = read_trimmed(dir, "INSTALLED_TIME")?
            .ok_or_else(|| malformed("missing INSTALLED_TIME"))?
            .parse()
            .map_err(|_| malformed("unparsable INSTALLED_TIME"))?;

        let mut builder = PackageId::builder(name, version, self.repository.clone())
            .installed_at(installed_time);

        if let Some(eapi) = read_trimmed(dir, "EAPI")? {
            builder = builder.with_eapi(eapi);
        }
        if let Some(slot) = read_trimmed(dir, "SLOT")? {
            if !slot.is_empty() {
                builder = builder.with_slot(Slot::new(&slot)?);
            }
        }
        if let Some(keywords) = read_trimmed(dir, "KEYWORDS")? {
            let keywords = keywords
                .split_whitespace()
                .map(Keyword::new)
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.with_keywords(keywords);
        }

        builder = builder.with_choices(read_choices(dir)?);

        for class in RECORDED_CLASSES {
            if let Some(raw) = read_trimmed(dir, class.variable_name())? {
                if !raw.is_empty() {
                    builder = builder.with_dependencies(*class, raw);
                }
            }
        }

        Ok(builder.build())
    }

    /// Writes the record for a freshly merged id.
    ///
    /// # Errors
    ///
    /// Returns an error if any record file cannot be written.
    pub fn write_record(
        &self,
        id: &PackageId,
        journal: &MergeJournal,
        environment: Option<&str>,
        build_start_time: i64,
    ) -> Result<(), Error> {
        let dir = self.record_dir(id.name(), id.version());
        fs::create_dir_all(&dir)
            .map_err(|e| Error::io(&dir, "creating the record directory", e))?;

        write_file(&dir, "EAPI", &format!("{}\n", id.eapi()))?;
        write_file(
            &dir,
            "SLOT",
            &format!("{}\n", id.slot().map(Slot::to_string).unwrap_or_default()),
        )?;

        let enabled: Vec<String> = id
            .choices()
            .sets()
            .iter()
            .flat_map(|set| set.values.iter())
            .filter(|value| value.enabled)
            .map(|value| value.name_with_prefix().to_string())
            .collect();
        write_file(&dir, "USE", &format!("{}\n", enabled.join(" ")))?;

        let listed: Vec<String> = id
            .choices()
            .sets()
            .iter()
            .flat_map(|set| set.values.iter())
            .filter(|value| value.explicitly_listed)
            .map(|value| {
                let prefix = if value.enabled_by_default { "+" } else { "" };
                format!("{prefix}{}", value.name_with_prefix())
            })
            .collect();
        write_file(&dir, "IUSE", &format!("{}\n", listed.join(" ")))?;

        let keywords: Vec<String> = id.keywords().iter().map(Keyword::to_string).collect();
        write_file(&dir, "KEYWORDS", &format!("{}\n", keywords.join(" ")))?;

        for class in RECORDED_CLASSES {
            let raw = id
                .dependencies(*class)
                .map(|key| key.raw().to_string())
                .unwrap_or_default();
            write_file(&dir, class.variable_name(), &format!("{raw}\n"))?;
        }

        let contents = journal_to_contents(journal);
        write_file(&dir, "CONTENTS", &contents.to_string())?;

        if let Some(environment) = environment {
            let path = dir.join("environment.bz2");
            let file = fs::File::create(&path)
                .map_err(|e| Error::io(&path, "creating the environment capture", e))?;
            let mut encoder = BzEncoder::new(file, Compression::default());
            encoder
                .write_all(environment.as_bytes())
                .and_then(|()| encoder.finish().map(drop))
                .map_err(|e| Error::io(&path, "writing the environment capture", e))?;
        }

        write_file(&dir, "BUILD_TIME", &format!("{build_start_time}\n"))?;
        let installed_time = id.installed_time().unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default()
        });
        write_file(&dir, "INSTALLED_TIME", &format!("{installed_time}\n"))?;

        log::debug!("recorded {} in {}", id.canonical_form(), dir.display());
        Ok(())
    }

    /// Reads the CONTENTS record of an id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id has no record or the record is malformed.
    pub fn read_contents(&self, id: &PackageId) -> Result<ContentsFile, Error> {
        let dir = self.record_dir(id.name(), id.version());
        let path = dir.join("CONTENTS");
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::io(&path, "reading the CONTENTS record", e))?;
        text.parse()
    }

    /// Reads the captured build environment of an id, decompressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture exists but cannot be read.
    pub fn read_environment(&self, id: &PackageId) -> Result<Option<String>, Error> {
        let path = self.record_dir(id.name(), id.version()).join("environment.bz2");
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path, "opening the environment capture", e)),
        };
        let mut text = String::new();
        BzDecoder::new(file)
            .read_to_string(&mut text)
            .map_err(|e| Error::io(&path, "reading the environment capture", e))?;
        Ok(Some(text))
    }

    /// Removes an id's recorded paths and the record itself.
    ///
    /// Entries `ignore` accepts are left on the filesystem; directories are
    /// only removed when empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or a path removal fails for
    /// a reason other than the path already being gone.
    pub fn remove_record(
        &self,
        id: &PackageId,
        ignore: &dyn Fn(&ContentsEntry) -> bool,
    ) -> Result<(), Error> {
        let contents = self.read_contents(id)?;

        // Files before the directories that hold them: walk in reverse
        // record order.
        for entry in contents.entries().iter().rev() {
            if ignore(entry) {
                continue;
            }
            let path = entry.path_buf();
            let result = match entry {
                ContentsEntry::Dir { .. } => fs::remove_dir(&path),
                _ => fs::remove_file(&path),
            };
            match result {
                Ok(()) => {}
                Err(e)
                    if e.kind() == std::io::ErrorKind::NotFound
                        || e.raw_os_error() == Some(rustix::io::Errno::NOTEMPTY.raw_os_error()) =>
                {
                    log::debug!("leaving {} alone during unmerge", path.display());
                }
                Err(e) => return Err(Error::io(&path, "unmerging a recorded path", e)),
            }
        }

        let dir = self.record_dir(id.name(), id.version());
        fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, "removing the record", e))?;
        Ok(())
    }
}

impl Destination for Vdb {
    fn repository(&self) -> &RepositoryName {
        &self.repository
    }

    fn record_install(
        &self,
        id: &PackageId,
        journal: &MergeJournal,
        environment: Option<&str>,
        build_start_time: i64,
    ) -> Result<(), CommonError> {
        self.write_record(id, journal, environment, build_start_time)
            .map_err(CommonError::from)
    }

    fn recorded_contents(&self, id: &PackageId) -> Result<MergeJournal, CommonError> {
        if !self.has_record(id) {
            return Err(CommonError::NotInstalledHere {
                id: id.canonical_form(),
                destination: self.repository.to_string(),
            });
        }
        let contents = self.read_contents(id)?;
        Ok(contents_to_journal(&contents))
    }

    fn unmerge(
        &self,
        id: &PackageId,
        ignore_for_unmerge: &dyn Fn(&JournalEntry) -> bool,
    ) -> Result<(), CommonError> {
        if !self.has_record(id) {
            return Err(CommonError::NotInstalledHere {
                id: id.canonical_form(),
                destination: self.repository.to_string(),
            });
        }
        self.remove_record(id, &|entry| {
            ignore_for_unmerge(&contents_entry_to_journal(entry))
        })
        .map_err(CommonError::from)
    }

    fn owner_of(&self, path: &Path) -> Option<String> {
        let ids = self.installed_ids().ok()?;
        for id in ids {
            let Ok(contents) = self.read_contents(&id) else {
                continue;
            };
            if contents
                .entries()
                .iter()
                .any(|entry| entry.path_buf() == path)
            {
                return Some(id.canonical_form());
            }
        }
        None
    }
}

/// A category directory name, kept as the raw string.
struct CategoryNameBuf(String);

impl CategoryNameBuf {
    fn parse(name: &str, dir: &Path) -> Result<Self, Error> {
        if name.is_empty() {
            Err(Error::MalformedRecord {
                path: dir.to_path_buf(),
                reason: "empty category directory name".to_string(),
            })
        } else {
            Ok(Self(name.to_string()))
        }
    }
}

fn file_name_str(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn read_dir_sorted(path: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut paths = Vec::new();
    let entries =
        fs::read_dir(path).map_err(|e| Error::io(path, "reading entries of directory", e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(path, "reading entry in directory", e))?;
        if file_name_str(&entry.path()) == Some(".lock") {
            continue;
        }
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn read_trimmed(dir: &Path, name: &str) -> Result<Option<String>, Error> {
    let path = dir.join(name);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(Some(text.trim_end_matches('\n').to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(&path, "reading a record file", e)),
    }
}

fn write_file(dir: &Path, name: &str, content: &str) -> Result<(), Error> {
    let path = dir.join(name);
    fs::write(&path, content).map_err(|e| Error::io(&path, "writing a record file", e))
}

fn read_choices(dir: &Path) -> Result<Choices, Error> {
    let enabled: Vec<String> = read_trimmed(dir, "USE")?
        .map(|text| text.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let listed: Vec<String> = read_trimmed(dir, "IUSE")?
        .map(|text| text.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let mut values = Vec::new();
    for raw in &listed {
        let enabled_by_default = raw.starts_with('+');
        let name = raw.trim_start_matches(['+', '-']);
        values.push(ChoiceValue {
            name: ChoiceName::new(name)?,
            prefix: None,
            enabled: enabled.iter().any(|flag| flag == name),
            locked: false,
            explicitly_listed: true,
            enabled_by_default,
        });
    }
    for flag in &enabled {
        if !values.iter().any(|value| value.name.as_str() == flag) {
            values.push(ChoiceValue {
                name: ChoiceName::new(flag)?,
                prefix: None,
                enabled: true,
                locked: false,
                explicitly_listed: false,
                enabled_by_default: false,
            });
        }
    }

    Ok(Choices::new(vec![ChoiceSet {
        raw_name: "USE".to_string(),
        human_name: "USE".to_string(),
        prefix: None,
        values,
    }]))
}

/// Converts a merge journal into CONTENTS entries.
pub fn journal_to_contents(journal: &MergeJournal) -> ContentsFile {
    let entries = journal
        .entries()
        .iter()
        .map(|entry| {
            let path = entry.path.to_string_lossy().into_owned();
            match &entry.kind {
                EntryKind::Dir => ContentsEntry::Dir { path },
                EntryKind::File { hashes, .. } => ContentsEntry::Obj {
                    path,
                    md5: hashes.md5.clone(),
                    mtime: entry.mtime,
                },
                EntryKind::Sym { target } => ContentsEntry::Sym {
                    path,
                    target: target.clone(),
                    mtime: entry.mtime,
                },
                EntryKind::Fifo => ContentsEntry::Fifo { path },
                EntryKind::Dev => ContentsEntry::Dev { path },
                EntryKind::Other => ContentsEntry::Misc { path },
            }
        })
        .collect();
    ContentsFile::from_entries(entries)
}

fn contents_entry_to_journal(entry: &ContentsEntry) -> JournalEntry {
    let (kind, mtime) = match entry {
        ContentsEntry::Dir { .. } => (EntryKind::Dir, 0),
        ContentsEntry::Obj { md5, mtime, .. } => (
            EntryKind::File {
                size: 0,
                hashes: FileHashes {
                    md5: md5.clone(),
                    rmd160: String::new(),
                    sha1: String::new(),
                    sha256: String::new(),
                },
            },
            *mtime,
        ),
        ContentsEntry::Sym { target, mtime, .. } => (
            EntryKind::Sym {
                target: target.clone(),
            },
            *mtime,
        ),
        ContentsEntry::Fifo { .. } => (EntryKind::Fifo, 0),
        ContentsEntry::Dev { .. } => (EntryKind::Dev, 0),
        ContentsEntry::Misc { .. } => (EntryKind::Other, 0),
    };
    JournalEntry {
        path: entry.path_buf(),
        kind,
        mtime,
    }
}

/// Converts a CONTENTS record back into a merge journal.
///
/// Only the MD5 checksum is recorded on disk; the remaining hash fields come
/// back empty and sizes come back zero.
pub fn contents_to_journal(contents: &ContentsFile) -> MergeJournal {
    MergeJournal::from_entries(
        contents
            .entries()
            .iter()
            .map(contents_entry_to_journal)
            .collect(),
    )
}

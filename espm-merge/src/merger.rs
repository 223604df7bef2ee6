//! The merge driver.

use std::{
    fs,
    os::unix::fs::{MetadataExt, PermissionsExt, symlink},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use espm_common::{Destination, EntryKind, JournalEntry, MergeJournal};
use espm_types::PackageId;
use rustix::fs::{CWD, FileType, Mode, mknodat};

use crate::{Error, hash::hash_file};

/// The tunables of one merge.
#[derive(Clone, Debug, Default)]
pub struct MergerOptions {
    /// Path prefixes (as installed, e.g. `/etc`) whose existing files are
    /// protected from overwrites.
    pub config_protect: Vec<PathBuf>,
    /// Path prefixes exempted from protection again.
    pub config_protect_mask: Vec<PathBuf>,
    /// Whether merged files get their modification time pinned to
    /// `build_start_time`.
    pub fix_mtimes: bool,
    /// The build start, seconds since the epoch.
    pub build_start_time: i64,
    /// Whether collisions with foreign owners are tolerated.
    pub permit_collisions: bool,
}

/// What one image entry is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ImageKind {
    Dir,
    File,
    Sym,
    Fifo,
    Dev,
    Other,
}

/// One checked image entry, relative to the image root.
#[derive(Debug)]
struct PlannedEntry {
    rel: PathBuf,
    kind: ImageKind,
}

/// Merges one staged image into a live root.
///
/// A merge has three phases: a check pass deciding for every image entry
/// whether it is new, an overwrite or a foreign collision; an apply pass
/// journalling and installing every entry so that each path is atomically
/// either pre-merge or post-merge; and the unmerge of whatever the replaced
/// ids still own and the new image did not re-merge.
#[derive(Debug)]
pub struct Merger<'a> {
    image: PathBuf,
    root: PathBuf,
    destination: &'a dyn Destination,
    options: MergerOptions,
}

impl<'a> Merger<'a> {
    /// Creates a merger from `image` into `root`, recording through
    /// `destination`.
    pub fn new(
        image: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        destination: &'a dyn Destination,
        options: MergerOptions,
    ) -> Self {
        Self {
            image: image.into(),
            root: root.into(),
            destination,
            options,
        }
    }

    /// Runs the whole merge for `id`, unmerging `replacing` afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error on a collision, a directory/non-directory
    /// mismatch, or any filesystem failure. A failure mid-apply leaves the
    /// journal recorded so far with the destination untouched.
    pub fn merge(
        &self,
        id: &PackageId,
        replacing: &[Arc<PackageId>],
        environment: Option<&str>,
    ) -> Result<MergeJournal, Error> {
        let entries = self.check(id, replacing)?;
        let journal = self.apply(&entries)?;

        self.destination
            .record_install(id, &journal, environment, self.options.build_start_time)?;

        for replaced in replacing {
            self.destination
                .unmerge(replaced, &|entry: &JournalEntry| {
                    journal.contains_path(&entry.path)
                })?;
        }

        log::info!(
            "merged {} ({} entries) into {}",
            id.canonical_form(),
            journal.entries().len(),
            self.root.display()
        );
        Ok(journal)
    }

    /// The check phase: classifies every image entry against the live
    /// root.
    fn check(&self, id: &PackageId, replacing: &[Arc<PackageId>]) -> Result<Vec<PlannedEntry>, Error> {
        let mut entries = Vec::new();
        collect_entries(&self.image, &self.image, &mut entries)?;
        entries.sort_by(|a, b| a.rel.cmp(&b.rel));

        let replacing_canonicals: Vec<String> = replacing
            .iter()
            .map(|replaced| replaced.canonical_form())
            .collect();

        for entry in &entries {
            let live = self.root.join(&entry.rel);
            let Ok(live_meta) = fs::symlink_metadata(&live) else {
                continue;
            };

            let live_is_dir = live_meta.file_type().is_dir();
            if (entry.kind == ImageKind::Dir) != live_is_dir {
                return Err(Error::KindMismatch { path: live });
            }
            if entry.kind == ImageKind::Dir {
                continue;
            }

            if let Some(owner) = self.destination.owner_of(&live) {
                let ours =
                    owner == id.canonical_form() || replacing_canonicals.contains(&owner);
                if !ours {
                    if self.options.permit_collisions {
                        log::warn!(
                            "overwriting {} owned by {owner} as requested",
                            live.display()
                        );
                    } else {
                        return Err(Error::Collision { path: live, owner });
                    }
                }
            }
        }

        Ok(entries)
    }

    /// The apply phase: installs every entry and journals the outcome.
    fn apply(&self, entries: &[PlannedEntry]) -> Result<MergeJournal, Error> {
        let mut journal = MergeJournal::new();

        for entry in entries {
            let source = self.image.join(&entry.rel);
            let live = self.root.join(&entry.rel);
            let meta = fs::symlink_metadata(&source)
                .map_err(|e| Error::io(&source, "inspecting an image entry", e))?;

            match entry.kind {
                ImageKind::Dir => {
                    if !live.is_dir() {
                        fs::create_dir(&live)
                            .map_err(|e| Error::io(&live, "creating a directory", e))?;
                        fs::set_permissions(
                            &live,
                            fs::Permissions::from_mode(meta.mode() & 0o7777),
                        )
                        .map_err(|e| Error::io(&live, "setting directory permissions", e))?;
                    }
                    journal.record(JournalEntry {
                        path: live,
                        kind: EntryKind::Dir,
                        mtime: meta.mtime(),
                    });
                }
                ImageKind::File => {
                    self.apply_file(entry, &source, &live, &meta, &mut journal)?;
                }
                ImageKind::Sym => {
                    self.apply_symlink(&source, &live, &meta, &mut journal)?;
                }
                ImageKind::Fifo | ImageKind::Dev => {
                    self.apply_node(entry.kind, &live, &meta, &mut journal)?;
                }
                ImageKind::Other => {
                    log::warn!(
                        "cannot merge {} (socket or unknown kind); recording only",
                        live.display()
                    );
                    journal.record(JournalEntry {
                        path: live,
                        kind: EntryKind::Other,
                        mtime: meta.mtime(),
                    });
                }
            }
        }

        Ok(journal)
    }

    fn apply_file(
        &self,
        entry: &PlannedEntry,
        source: &Path,
        live: &Path,
        meta: &fs::Metadata,
        journal: &mut MergeJournal,
    ) -> Result<(), Error> {
        let (size, hashes) = hash_file(source)?;
        let mtime = if self.options.fix_mtimes {
            self.options.build_start_time
        } else {
            meta.mtime()
        };

        let target = if self.protects(&entry.rel) && live.is_file() && {
            let (_, live_hashes) = hash_file(live)?;
            live_hashes.md5 != hashes.md5
        } {
            let sibling = config_protect_sibling(live)?;
            log::info!(
                "protecting {}; writing the update to {}",
                live.display(),
                sibling.display()
            );
            sibling
        } else {
            live.to_path_buf()
        };

        // Copy beside the target, then rename over it, so the path flips
        // from old to new content in one step.
        let staging = staging_name(&target)?;
        fs::copy(source, &staging)
            .map_err(|e| Error::io(&staging, "staging a file beside its target", e))?;
        fs::set_permissions(&staging, fs::Permissions::from_mode(meta.mode() & 0o7777))
            .map_err(|e| Error::io(&staging, "setting file permissions", e))?;
        set_mtime(&staging, mtime)?;
        fs::rename(&staging, &target)
            .map_err(|e| Error::io(&target, "renaming a staged file over its target", e))?;

        journal.record(JournalEntry {
            path: target,
            kind: EntryKind::File { size, hashes },
            mtime,
        });
        Ok(())
    }

    fn apply_symlink(
        &self,
        source: &Path,
        live: &Path,
        meta: &fs::Metadata,
        journal: &mut MergeJournal,
    ) -> Result<(), Error> {
        let target = fs::read_link(source)
            .map_err(|e| Error::io(source, "reading an image symlink", e))?;
        let target = self.rewrite_symlink_target(target);

        let staging = staging_name(live)?;
        symlink(&target, &staging)
            .map_err(|e| Error::io(&staging, "creating a staged symlink", e))?;
        fs::rename(&staging, live)
            .map_err(|e| Error::io(live, "renaming a staged symlink over its target", e))?;

        journal.record(JournalEntry {
            path: live.to_path_buf(),
            kind: EntryKind::Sym {
                target: target.to_string_lossy().into_owned(),
            },
            mtime: meta.mtime(),
        });
        Ok(())
    }

    fn apply_node(
        &self,
        kind: ImageKind,
        live: &Path,
        meta: &fs::Metadata,
        journal: &mut MergeJournal,
    ) -> Result<(), Error> {
        if fs::symlink_metadata(live).is_ok() {
            fs::remove_file(live)
                .map_err(|e| Error::io(live, "removing an entry before mknod", e))?;
        }

        let mode = Mode::from_raw_mode(meta.mode() & 0o7777);
        let (file_type, dev, entry_kind) = if kind == ImageKind::Fifo {
            (FileType::Fifo, 0, EntryKind::Fifo)
        } else {
            let file_type = if FileType::from_raw_mode(meta.mode()) == FileType::BlockDevice {
                FileType::BlockDevice
            } else {
                FileType::CharacterDevice
            };
            (file_type, meta.rdev(), EntryKind::Dev)
        };
        mknodat(CWD, live, file_type, mode, dev)
            .map_err(|e| Error::io(live, "creating a device or fifo node", e.into()))?;

        journal.record(JournalEntry {
            path: live.to_path_buf(),
            kind: entry_kind,
            mtime: meta.mtime(),
        });
        Ok(())
    }

    /// Rewrites absolute symlink targets that point back into the image to
    /// the corresponding live path.
    fn rewrite_symlink_target(&self, target: PathBuf) -> PathBuf {
        match target.strip_prefix(&self.image) {
            Ok(rest) => {
                let rewritten = self.root.join(rest);
                log::debug!(
                    "rewriting symlink target {} to {}",
                    target.display(),
                    rewritten.display()
                );
                rewritten
            }
            Err(_) => target,
        }
    }

    /// Whether the as-installed path of `rel` falls under config
    /// protection.
    fn protects(&self, rel: &Path) -> bool {
        let rooted = Path::new("/").join(rel);
        let masked = self
            .options
            .config_protect_mask
            .iter()
            .any(|prefix| rooted.starts_with(prefix));
        !masked
            && self
                .options
                .config_protect
                .iter()
                .any(|prefix| rooted.starts_with(prefix))
    }
}

/// Collects image entries depth first.
fn collect_entries(
    path: &Path,
    image: &Path,
    entries: &mut Vec<PlannedEntry>,
) -> Result<(), Error> {
    let dir = fs::read_dir(path).map_err(|e| Error::io(path, "reading entries of directory", e))?;
    for entry in dir {
        let entry = entry.map_err(|e| Error::io(path, "reading entry in directory", e))?;
        let meta = fs::symlink_metadata(entry.path())
            .map_err(|e| Error::io(entry.path(), "inspecting an image entry", e))?;
        let file_type = meta.file_type();

        let kind = if file_type.is_dir() {
            ImageKind::Dir
        } else if file_type.is_file() {
            ImageKind::File
        } else if file_type.is_symlink() {
            ImageKind::Sym
        } else {
            match FileType::from_raw_mode(meta.mode()) {
                FileType::Fifo => ImageKind::Fifo,
                FileType::CharacterDevice | FileType::BlockDevice => ImageKind::Dev,
                _ => ImageKind::Other,
            }
        };

        let rel = entry
            .path()
            .strip_prefix(image)
            .map_err(|e| Error::IoPath {
                path: entry.path(),
                context: "stripping the image prefix",
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?
            .to_path_buf();
        entries.push(PlannedEntry { rel, kind });

        if file_type.is_dir() {
            collect_entries(&entry.path(), image, entries)?;
        }
    }
    Ok(())
}

/// The temporary sibling name used for atomic rename-over.
fn staging_name(target: &Path) -> Result<PathBuf, Error> {
    let name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::IoPath {
            path: target.to_path_buf(),
            context: "deriving a staging name",
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "nameless target"),
        })?;
    Ok(target.with_file_name(format!(".espm-merge.{name}")))
}

/// Finds the first free `._cfg????_<name>` sibling for a protected path.
fn config_protect_sibling(live: &Path) -> Result<PathBuf, Error> {
    let name = live
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::ConfigProtectExhausted {
            path: live.to_path_buf(),
        })?;
    for counter in 0..10_000u32 {
        let candidate = live.with_file_name(format!("._cfg{counter:04}_{name}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::ConfigProtectExhausted {
        path: live.to_path_buf(),
    })
}

fn set_mtime(path: &Path, mtime: i64) -> Result<(), Error> {
    let time: SystemTime = UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64);
    let file = fs::File::options()
        .write(true)
        .open(path)
        .map_err(|e| Error::io(path, "opening a file to set its times", e))?;
    file.set_times(fs::FileTimes::new().set_modified(time))
        .map_err(|e| Error::io(path, "setting file times", e))
}

#[cfg(test)]
mod tests {
    use std::{io::Write as _, os::unix::fs::MetadataExt};

    use espm_types::RepositoryName;
    use espm_vdb::Vdb;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::tempdir;
    use testresult::TestResult;

    use super::*;

    fn sample_id(canonical: &str) -> PackageId {
        let (name, version, slot, repository) =
            PackageId::canonical_parts(canonical).unwrap();
        let mut builder = PackageId::builder(name, version, repository);
        if let Some(slot) = slot {
            builder = builder.with_slot(slot);
        }
        builder.installed_at(1_700_000_000).build()
    }

    fn write_image(image: &Path) -> TestResult {
        fs::create_dir_all(image.join("usr/bin"))?;
        let mut file = fs::File::create(image.join("usr/bin/tool"))?;
        writeln!(file, "#!/bin/sh")?;
        symlink("tool", image.join("usr/bin/alias"))?;
        mknodat(
            CWD,
            image.join("usr/bin/pipe"),
            FileType::Fifo,
            Mode::from_raw_mode(0o644),
            0,
        )?;
        Ok(())
    }

    fn layout(root: &Path) -> Vec<String> {
        fn walk(path: &Path, root: &Path, out: &mut Vec<String>) {
            let mut entries: Vec<_> = fs::read_dir(path)
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .collect();
            entries.sort();
            for entry in entries {
                let rel = entry.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                let meta = fs::symlink_metadata(&entry).unwrap();
                let kind = if meta.file_type().is_dir() {
                    "dir"
                } else if meta.file_type().is_symlink() {
                    "sym"
                } else if meta.file_type().is_file() {
                    "file"
                } else {
                    "node"
                };
                out.push(format!("{kind} {rel}"));
                if meta.file_type().is_dir() {
                    walk(&entry, root, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(root, root, &mut out);
        out
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        image: PathBuf,
        root: PathBuf,
        vdb: Vdb,
    }

    fn fixture() -> TestResult<Fixture> {
        let dir = tempdir()?;
        let image = dir.path().join("image");
        let root = dir.path().join("root");
        fs::create_dir_all(&image)?;
        fs::create_dir_all(&root)?;
        let vdb = Vdb::open(dir.path().join("vdb"), RepositoryName::new("installed")?)?;
        Ok(Fixture {
            _dir: dir,
            image,
            root,
            vdb,
        })
    }

    /// Merging a synthetic image with one of each entry kind, unmerging
    /// and re-merging reproduces the original live layout.
    #[rstest]
    fn merge_unmerge_remerge_round_trip() -> TestResult {
        let fx = fixture()?;
        write_image(&fx.image)?;
        let id = sample_id("cat/pkg-1::installed");
        let merger = Merger::new(&fx.image, &fx.root, &fx.vdb, MergerOptions::default());

        let journal = merger.merge(&id, &[], Some("CFLAGS=-O2\n"))?;
        assert_eq!(journal.entries().len(), 5);
        let merged_layout = layout(&fx.root);
        assert_eq!(
            merged_layout,
            vec![
                "dir usr",
                "dir usr/bin",
                "sym usr/bin/alias",
                "node usr/bin/pipe",
                "file usr/bin/tool",
            ]
        );

        fx.vdb.unmerge(&id, &|_| false)?;
        assert_eq!(layout(&fx.root), Vec::<String>::new());

        merger.merge(&id, &[], None)?;
        assert_eq!(layout(&fx.root), merged_layout);
        Ok(())
    }

    #[rstest]
    fn foreign_collision_fails_unless_permitted() -> TestResult {
        let fx = fixture()?;
        write_image(&fx.image)?;

        // An unrelated installed package already owns the tool path.
        let other = sample_id("cat/other-1::installed");
        let mut other_journal = MergeJournal::new();
        other_journal.record(JournalEntry {
            path: fx.root.join("usr/bin/tool"),
            kind: EntryKind::Other,
            mtime: 0,
        });
        fx.vdb.record_install(&other, &other_journal, None, 0)?;
        fs::create_dir_all(fx.root.join("usr/bin"))?;
        fs::write(fx.root.join("usr/bin/tool"), "old")?;

        let id = sample_id("cat/pkg-1::installed");
        let merger = Merger::new(&fx.image, &fx.root, &fx.vdb, MergerOptions::default());
        assert!(matches!(
            merger.merge(&id, &[], None),
            Err(Error::Collision { .. })
        ));

        let merger = Merger::new(
            &fx.image,
            &fx.root,
            &fx.vdb,
            MergerOptions {
                permit_collisions: true,
                ..MergerOptions::default()
            },
        );
        assert!(merger.merge(&id, &[], None).is_ok());
        Ok(())
    }

    #[rstest]
    fn config_protection_writes_siblings() -> TestResult {
        let fx = fixture()?;
        fs::create_dir_all(fx.image.join("etc"))?;
        fs::write(fx.image.join("etc/app.conf"), "new setting\n")?;
        fs::create_dir_all(fx.root.join("etc"))?;
        fs::write(fx.root.join("etc/app.conf"), "user edited\n")?;

        let id = sample_id("cat/pkg-1::installed");
        let merger = Merger::new(
            &fx.image,
            &fx.root,
            &fx.vdb,
            MergerOptions {
                config_protect: vec![PathBuf::from("/etc")],
                ..MergerOptions::default()
            },
        );
        merger.merge(&id, &[], None)?;

        assert_eq!(fs::read_to_string(fx.root.join("etc/app.conf"))?, "user edited\n");
        assert_eq!(
            fs::read_to_string(fx.root.join("etc/._cfg0000_app.conf"))?,
            "new setting\n"
        );
        Ok(())
    }

    #[rstest]
    fn config_protect_mask_overrides() -> TestResult {
        let fx = fixture()?;
        fs::create_dir_all(fx.image.join("etc/env.d"))?;
        fs::write(fx.image.join("etc/env.d/50app"), "new\n")?;
        fs::create_dir_all(fx.root.join("etc/env.d"))?;
        fs::write(fx.root.join("etc/env.d/50app"), "old\n")?;

        let id = sample_id("cat/pkg-1::installed");
        let merger = Merger::new(
            &fx.image,
            &fx.root,
            &fx.vdb,
            MergerOptions {
                config_protect: vec![PathBuf::from("/etc")],
                config_protect_mask: vec![PathBuf::from("/etc/env.d")],
                ..MergerOptions::default()
            },
        );
        merger.merge(&id, &[], None)?;
        assert_eq!(fs::read_to_string(fx.root.join("etc/env.d/50app"))?, "new\n");
        Ok(())
    }

    #[rstest]
    fn mtimes_are_pinned_when_requested() -> TestResult {
        let fx = fixture()?;
        fs::create_dir_all(fx.image.join("usr"))?;
        fs::write(fx.image.join("usr/file"), "data")?;

        let id = sample_id("cat/pkg-1::installed");
        let merger = Merger::new(
            &fx.image,
            &fx.root,
            &fx.vdb,
            MergerOptions {
                fix_mtimes: true,
                build_start_time: 1_600_000_000,
                ..MergerOptions::default()
            },
        );
        let journal = merger.merge(&id, &[], None)?;

        let meta = fs::metadata(fx.root.join("usr/file"))?;
        assert_eq!(meta.mtime(), 1_600_000_000);
        let file_entry = journal
            .entries()
            .iter()
            .find(|entry| matches!(entry.kind, EntryKind::File { .. }))
            .expect("file entry");
        assert_eq!(file_entry.mtime, 1_600_000_000);
        Ok(())
    }

    #[rstest]
    fn image_pointing_symlinks_are_rewritten() -> TestResult {
        let fx = fixture()?;
        fs::create_dir_all(fx.image.join("usr"))?;
        fs::write(fx.image.join("usr/real"), "data")?;
        symlink(fx.image.join("usr/real"), fx.image.join("usr/link"))?;

        let id = sample_id("cat/pkg-1::installed");
        let merger = Merger::new(&fx.image, &fx.root, &fx.vdb, MergerOptions::default());
        merger.merge(&id, &[], None)?;

        assert_eq!(
            fs::read_link(fx.root.join("usr/link"))?,
            fx.root.join("usr/real")
        );
        Ok(())
    }

    /// Replacing an installed version removes its stale paths but keeps
    /// everything the new image re-merged.
    #[rstest]
    fn replacing_unmerges_only_stale_paths() -> TestResult {
        let fx = fixture()?;

        fs::create_dir_all(fx.image.join("usr"))?;
        fs::write(fx.image.join("usr/kept"), "old")?;
        fs::write(fx.image.join("usr/stale"), "old")?;
        let old = sample_id("cat/pkg-1::installed");
        let merger = Merger::new(&fx.image, &fx.root, &fx.vdb, MergerOptions::default());
        merger.merge(&old, &[], None)?;

        fs::remove_file(fx.image.join("usr/stale"))?;
        fs::write(fx.image.join("usr/kept"), "new")?;
        let new = sample_id("cat/pkg-2::installed");
        let merger = Merger::new(&fx.image, &fx.root, &fx.vdb, MergerOptions::default());
        merger.merge(&new, &[Arc::new(sample_id("cat/pkg-1::installed"))], None)?;

        assert_eq!(fs::read_to_string(fx.root.join("usr/kept"))?, "new");
        assert!(!fx.root.join("usr/stale").exists());
        assert!(!fx.vdb.has_record(&old));
        assert!(fx.vdb.has_record(&new));
        Ok(())
    }
}

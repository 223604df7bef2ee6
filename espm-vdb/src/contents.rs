//! The CONTENTS file format.

use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
    str::FromStr,
};

use crate::Error;

/// One line of a CONTENTS file.
///
/// Paths may contain internal and trailing spaces; they are kept verbatim so
/// that reading and writing a file reproduces it byte for byte. A symlink
/// target is everything between the first ` -> ` and the trailing
/// modification time, and may itself contain further `->` sequences.
///
/// ## Examples
/// ```
/// use std::str::FromStr;
///
/// use espm_vdb::ContentsEntry;
///
/// # fn main() -> Result<(), espm_vdb::Error> {
/// let entry = ContentsEntry::from_str("sym /usr/bin/cc -> gcc -> real 1700000000")?;
/// let ContentsEntry::Sym { target, .. } = &entry else {
///     panic!("expected a symlink");
/// };
/// assert_eq!(target, "gcc -> real");
/// assert_eq!(entry.to_string(), "sym /usr/bin/cc -> gcc -> real 1700000000");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContentsEntry {
    /// A directory.
    Dir {
        /// The absolute path.
        path: String,
    },
    /// A regular file with its MD5 checksum and modification time.
    Obj {
        /// The absolute path.
        path: String,
        /// The MD5 checksum of the file content, hex encoded.
        md5: String,
        /// The modification time, seconds since the epoch.
        mtime: i64,
    },
    /// A symbolic link with its target and modification time.
    Sym {
        /// The absolute path.
        path: String,
        /// The link target, verbatim.
        target: String,
        /// The modification time, seconds since the epoch.
        mtime: i64,
    },
    /// A named pipe.
    Fifo {
        /// The absolute path.
        path: String,
    },
    /// A device node.
    Dev {
        /// The absolute path.
        path: String,
    },
    /// Anything else.
    Misc {
        /// The absolute path.
        path: String,
    },
}

impl ContentsEntry {
    /// Returns the recorded path.
    pub fn path(&self) -> &str {
        match self {
            ContentsEntry::Dir { path }
            | ContentsEntry::Obj { path, .. }
            | ContentsEntry::Sym { path, .. }
            | ContentsEntry::Fifo { path }
            | ContentsEntry::Dev { path }
            | ContentsEntry::Misc { path } => path,
        }
    }

    /// Returns the recorded path as a [`PathBuf`].
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(self.path())
    }

    fn bad(line: &str, reason: impl Into<String>) -> Error {
        Error::InvalidContentsLine {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

impl FromStr for ContentsEntry {
    type Err = Error;

    /// Parses one CONTENTS line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentsLine`] on an unknown entry type, a
    /// missing field, or an unparsable checksum or time field.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = line
            .split_once(' ')
            .ok_or_else(|| Self::bad(line, "missing entry type separator"))?;

        match kind {
            "dir" => Ok(ContentsEntry::Dir {
                path: rest.to_string(),
            }),
            "fif" => Ok(ContentsEntry::Fifo {
                path: rest.to_string(),
            }),
            "dev" => Ok(ContentsEntry::Dev {
                path: rest.to_string(),
            }),
            "misc" => Ok(ContentsEntry::Misc {
                path: rest.to_string(),
            }),
            "obj" => {
                // The path may contain spaces; the checksum and time are the
                // last two space-separated fields.
                let mut fields = rest.rsplitn(3, ' ');
                let mtime = fields
                    .next()
                    .ok_or_else(|| Self::bad(line, "missing mtime"))?;
                let md5 = fields
                    .next()
                    .ok_or_else(|| Self::bad(line, "missing checksum"))?;
                let path = fields
                    .next()
                    .ok_or_else(|| Self::bad(line, "missing path"))?;
                let mtime: i64 = mtime
                    .parse()
                    .map_err(|_| Self::bad(line, format!("bad mtime {mtime:?}")))?;
                if md5.is_empty() || !md5.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(Self::bad(line, format!("bad checksum {md5:?}")));
                }
                Ok(ContentsEntry::Obj {
                    path: path.to_string(),
                    md5: md5.to_string(),
                    mtime,
                })
            }
            "sym" => {
                // Greedy match on the first " -> ": the path may not contain
                // the arrow, the target may.
                let (path, rest) = rest
                    .split_once(" -> ")
                    .ok_or_else(|| Self::bad(line, "missing -> separator"))?;
                let (target, mtime) = rest
                    .rsplit_once(' ')
                    .ok_or_else(|| Self::bad(line, "missing mtime"))?;
                let mtime: i64 = mtime
                    .parse()
                    .map_err(|_| Self::bad(line, format!("bad mtime {mtime:?}")))?;
                Ok(ContentsEntry::Sym {
                    path: path.to_string(),
                    target: target.to_string(),
                    mtime,
                })
            }
            other => Err(Self::bad(line, format!("unknown entry type {other:?}"))),
        }
    }
}

impl Display for ContentsEntry {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ContentsEntry::Dir { path } => write!(f, "dir {path}"),
            ContentsEntry::Obj { path, md5, mtime } => write!(f, "obj {path} {md5} {mtime}"),
            ContentsEntry::Sym {
                path,
                target,
                mtime,
            } => write!(f, "sym {path} -> {target} {mtime}"),
            ContentsEntry::Fifo { path } => write!(f, "fif {path}"),
            ContentsEntry::Dev { path } => write!(f, "dev {path}"),
            ContentsEntry::Misc { path } => write!(f, "misc {path}"),
        }
    }
}

/// A whole CONTENTS file.
///
/// Parsing then printing reproduces the input byte for byte.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContentsFile {
    entries: Vec<ContentsEntry>,
}

impl ContentsFile {
    /// Creates a CONTENTS file from entries.
    pub fn from_entries(entries: Vec<ContentsEntry>) -> Self {
        Self { entries }
    }

    /// Returns the entries in file order.
    pub fn entries(&self) -> &[ContentsEntry] {
        &self.entries
    }
}

impl FromStr for ContentsFile {
    type Err = Error;

    /// Parses a newline-terminated CONTENTS file.
    ///
    /// # Errors
    ///
    /// Returns an error on the first malformed line.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut entries = Vec::new();
        for line in input.split('\n') {
            if line.is_empty() {
                continue;
            }
            entries.push(line.parse()?);
        }
        Ok(Self { entries })
    }
}

impl Display for ContentsFile {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

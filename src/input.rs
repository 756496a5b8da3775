//! Input resolution.
//!
//! Turns the inputs given on the command line into one ordered list of
//! [`Entry`] values:
//!
//! - a file path is packaged under its base name
//! - a directory is walked, each file packaged under its path relative to
//!   the directory
//! - `dest=src` packages `src` under `dest` verbatim
//! - a mapping file contributes one entry per line

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tokio::{fs, task};
use tracing::debug;
use walkdir::WalkDir;

use crate::encode::CONTENT_TYPES_PART;
use crate::error::{AppxError, Result};
use crate::manifest::BLOCK_MAP_PART;
use crate::mapping::read_mapping_file;
use crate::sign::SIGNATURE_PART;

/// Archive paths the packager writes itself
pub const RESERVED_ARCHIVE_PATHS: &[&str] = &[CONTENT_TYPES_PART, BLOCK_MAP_PART, SIGNATURE_PART];

/// One file to package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// `/`-separated path inside the package, unescaped
    pub archive_path: String,
    /// File to read the content from
    pub source: PathBuf,
}

/// How one input was specified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    /// A file or directory; the archive path is inferred
    Path(PathBuf),
    /// An explicit `dest=src` pair
    Mapped {
        archive_path: String,
        source: PathBuf,
    },
    /// A mapping file, `-` for standard input
    MappingFile(PathBuf),
}

impl InputSpec {
    /// Interpret a positional argument. Anything containing `=` is split
    /// at the first `=` into `dest=src`.
    pub fn from_arg(arg: &str) -> Self {
        match arg.split_once('=') {
            Some((archive_path, source)) => InputSpec::Mapped {
                archive_path: archive_path.to_string(),
                source: PathBuf::from(source),
            },
            None => InputSpec::Path(PathBuf::from(arg)),
        }
    }
}

/// Check that `archive_path` names a file inside the package.
pub fn validate_archive_path(archive_path: &str) -> Result<()> {
    let bad_segment = archive_path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    // Tab, line feed and carriage return survive as character references;
    // other C0 controls cannot appear in XML at all
    let bad_control = archive_path
        .chars()
        .any(|c| c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r'));
    if bad_segment || bad_control {
        return Err(AppxError::InvalidArchivePath(archive_path.to_string()));
    }
    if RESERVED_ARCHIVE_PATHS.contains(&archive_path) {
        return Err(AppxError::ReservedArchivePath(archive_path.to_string()));
    }
    Ok(())
}

/// Paths that must never end up inside the package (the output file).
#[derive(Debug, Default, Clone)]
pub struct Exclusions {
    paths: Vec<(OsString, PathBuf)>,
}

impl Exclusions {
    /// Exclude `path`, which does not need to exist yet.
    pub fn add(&mut self, path: &Path) {
        let Some(name) = path.file_name() else {
            return;
        };
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // Without a resolvable parent nothing inside a walk can match it
        if let Ok(parent) = std::fs::canonicalize(parent) {
            self.paths.push((name.to_os_string(), parent.join(name)));
        }
    }

    fn contains(&self, candidate: &Path) -> bool {
        let Some(name) = candidate.file_name() else {
            return false;
        };
        if !self.paths.iter().any(|(n, _)| n == name) {
            return false;
        }
        let Some(parent) = candidate.parent() else {
            return false;
        };
        match std::fs::canonicalize(parent) {
            Ok(parent) => {
                let candidate = parent.join(name);
                self.paths.iter().any(|(_, p)| *p == candidate)
            }
            Err(_) => false,
        }
    }
}

/// Collects entries, rejecting duplicate archive paths.
struct EntryList {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl EntryList {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn push(&mut self, archive_path: String, source: PathBuf) -> Result<()> {
        validate_archive_path(&archive_path)?;
        if let Some(&i) = self.index.get(&archive_path) {
            return Err(AppxError::DuplicateArchivePath {
                archive_path,
                first: self.entries[i].source.clone(),
                second: source,
            });
        }
        debug!(archive_path = %archive_path, source = %source.display(), "resolved input");
        self.index.insert(archive_path.clone(), self.entries.len());
        self.entries.push(Entry {
            archive_path,
            source,
        });
        Ok(())
    }
}

fn utf8_name(name: OsString) -> Result<String> {
    name.into_string()
        .map_err(|name| AppxError::InvalidArchivePath(name.to_string_lossy().into_owned()))
}

/// Walk `root` depth-first in file name order, returning every file under
/// its `/`-joined path relative to `root`.
///
/// Symlinked directories are not followed. A symlink to a file is returned
/// like a regular file.
fn walk_directory(root: &Path, exclusions: &Exclusions) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            AppxError::input(path, io::Error::from(e))
        })?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink()
            && std::fs::metadata(entry.path()).is_ok_and(|target| target.is_dir())
        {
            debug!(path = %entry.path().display(), "skipping symlink to directory");
            continue;
        }
        if exclusions.contains(entry.path()) {
            debug!(path = %entry.path().display(), "skipping output file");
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| AppxError::InvalidArchivePath(entry.path().display().to_string()))?;
        let archive_path = relative
            .components()
            .map(|c| utf8_name(c.as_os_str().to_os_string()))
            .collect::<Result<Vec<_>>>()?
            .join("/");
        found.push((archive_path, entry.into_path()));
    }

    Ok(found)
}

/// Resolve `specs` into entries, in the order given.
///
/// Mapping files cannot be combined with other inputs. Files matching
/// `exclusions` are skipped during directory walks. Duplicate archive paths
/// are an error.
pub async fn resolve(specs: &[InputSpec], exclusions: &Exclusions) -> Result<Vec<Entry>> {
    let has_mapping_file = specs.iter().any(|s| matches!(s, InputSpec::MappingFile(_)));
    if has_mapping_file && specs.len() > 1 {
        return Err(AppxError::MixedInputs);
    }

    let mut list = EntryList::new();
    for spec in specs {
        match spec {
            InputSpec::Path(path) => {
                let metadata = fs::metadata(path)
                    .await
                    .map_err(|e| AppxError::input(path, e))?;
                if metadata.is_dir() {
                    let root = path.clone();
                    let exclusions = exclusions.clone();
                    let found =
                        task::spawn_blocking(move || walk_directory(&root, &exclusions))
                            .await
                            .map_err(io::Error::other)??;
                    for (archive_path, source) in found {
                        list.push(archive_path, source)?;
                    }
                } else {
                    let name = path
                        .file_name()
                        .ok_or_else(|| AppxError::InvalidArchivePath(path.display().to_string()))?;
                    list.push(utf8_name(name.to_os_string())?, path.clone())?;
                }
            }
            InputSpec::Mapped {
                archive_path,
                source,
            } => list.push(archive_path.clone(), source.clone())?,
            InputSpec::MappingFile(path) => {
                for entry in read_mapping_file(path).await? {
                    list.push(entry.archive_path, entry.source)?;
                }
            }
        }
    }

    if list.entries.is_empty() {
        return Err(AppxError::NoInputs);
    }
    Ok(list.entries)
}

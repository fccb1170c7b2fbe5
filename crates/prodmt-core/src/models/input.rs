use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::prodigal::{PROTEIN_FILE_EXTENSION, TRAINING_FILE_EXTENSION};

/// A sequence file named on the command line, with the names derived from it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InputFile {
    /// The path exactly as it was given.
    pub path: PathBuf,
    /// `path` resolved against the launcher's current directory.
    pub absolute: PathBuf,
    /// `path` with its extension removed; relative prefixes resolve against
    /// the working directory the tool runs in.
    pub prefix: PathBuf,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>, current_dir: &Path) -> Self {
        let path = path.into();
        let absolute = if path.is_absolute() {
            path.clone()
        } else {
            current_dir.join(&path)
        };
        let prefix = derive_prefix(&path);

        Self {
            path,
            absolute,
            prefix,
        }
    }

    pub fn parent_dir(&self) -> Option<&Path> {
        self.absolute.parent()
    }

    pub fn training_file(&self) -> PathBuf {
        with_suffix(&self.prefix, TRAINING_FILE_EXTENSION)
    }

    pub fn protein_file(&self) -> PathBuf {
        with_suffix(&self.prefix, PROTEIN_FILE_EXTENSION)
    }

    /// Where the prefix lands once the tool runs in `working_dir`.
    pub fn resolved_prefix(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(&self.prefix)
    }
}

/// Strips the last extension of `path`, keeping its directory part.
///
/// Names whose only dot is leading (`.hidden`) have no extension and are
/// returned unchanged.
pub fn derive_prefix(path: &Path) -> PathBuf {
    if path.extension().is_none() {
        return path.to_path_buf();
    }
    path.with_extension("")
}

// `Path::with_extension` would clobber dots left in the prefix (`a.b.c` -> `a.b`).
fn with_suffix(prefix: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

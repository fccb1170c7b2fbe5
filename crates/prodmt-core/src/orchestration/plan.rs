use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::models::{CoreError, CoreErrorKind, InputFile};
use crate::orchestration::OrchestrationResult;

/// The resolved argument list: where the tool runs and which files it runs on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub working_dir: PathBuf,
    pub inputs: Vec<InputFile>,
}

impl LaunchPlan {
    /// Splits a full argument vector: the first entry is the program's own
    /// invocation name, every later entry is an input file.
    pub fn from_argv<I, S>(argv: I, current_dir: &Path) -> OrchestrationResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                "argument list must start with the program name",
            )
        })?;

        Ok(Self::new(
            Path::new(&program),
            argv.map(PathBuf::from),
            current_dir,
        ))
    }

    pub fn new(
        program: &Path,
        files: impl IntoIterator<Item = impl Into<PathBuf>>,
        current_dir: &Path,
    ) -> Self {
        let working_dir = working_dir_for_program(program, current_dir);
        let inputs = files
            .into_iter()
            .map(|file| InputFile::new(file, current_dir))
            .collect();

        Self {
            program: program.to_path_buf(),
            working_dir,
            inputs,
        }
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    /// Inputs whose outputs land on the same files, keyed by the shared
    /// resolved prefix. Later inputs overwrite earlier ones.
    pub fn prefix_collisions(&self) -> Vec<(PathBuf, Vec<PathBuf>)> {
        let mut by_prefix: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for input in &self.inputs {
            by_prefix
                .entry(input.resolved_prefix(&self.working_dir))
                .or_default()
                .push(input.path.clone());
        }

        by_prefix
            .into_iter()
            .filter(|(_, inputs)| inputs.len() > 1)
            .collect()
    }
}

/// The directory holding the program, after resolving symlinks when the
/// program path exists.
pub fn working_dir_for_program(program: &Path, current_dir: &Path) -> PathBuf {
    let absolute = if program.is_absolute() {
        program.to_path_buf()
    } else {
        current_dir.join(program)
    };
    let resolved = absolute.canonicalize().unwrap_or(absolute);

    match resolved.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => current_dir.to_path_buf(),
    }
}

//! Command lines for the two Prodigal invocations each task performs.
//!
//! Train mode writes a training file from the input sequence:
//! `prodigal -t <prefix>.ptrain -c -i <input>`.
//! Call mode predicts genes with that training file and writes the protein
//! translations: `prodigal -c -i <input> -a <prefix>.faa -t <prefix>.ptrain`.
//! `-c` (closed ends) is passed in both modes.

use std::path::{Path, PathBuf};

use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{InputFile, Stage, TaskId};

pub const PRODIGAL_COMMAND: &str = "prodigal";
pub const TRAINING_FILE_EXTENSION: &str = "ptrain";
pub const PROTEIN_FILE_EXTENSION: &str = "faa";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProdigalTool {
    program: PathBuf,
}

impl Default for ProdigalTool {
    fn default() -> Self {
        Self::new(PRODIGAL_COMMAND)
    }
}

impl ProdigalTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn train_command(&self, input: &InputFile, working_dir: &Path) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg("-t")
            .arg(input.training_file())
            .arg("-c")
            .arg("-i")
            .arg(&input.absolute)
            .working_dir(working_dir)
    }

    pub fn call_command(&self, input: &InputFile, working_dir: &Path) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg("-c")
            .arg("-i")
            .arg(&input.absolute)
            .arg("-a")
            .arg(input.protein_file())
            .arg("-t")
            .arg(input.training_file())
            .working_dir(working_dir)
    }

    pub fn request(
        &self,
        task_id: Option<TaskId>,
        stage: Stage,
        input: &InputFile,
        working_dir: &Path,
    ) -> ProcessSpawnRequest {
        let command = match stage {
            Stage::Train => self.train_command(input, working_dir),
            Stage::Call => self.call_command(input, working_dir),
        };
        let mut request = ProcessSpawnRequest::new(stage, command);
        if let Some(task_id) = task_id {
            request = request.task_id(task_id);
        }
        request
    }
}

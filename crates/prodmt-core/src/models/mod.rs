pub mod error;
pub mod input;
pub mod report;
pub mod task;

pub use error::{CoreError, CoreErrorKind};
pub use input::{InputFile, derive_prefix};
pub use report::{LaunchReport, StageOutcome, TaskReport};
pub use task::{Stage, TaskId, TaskStatus};

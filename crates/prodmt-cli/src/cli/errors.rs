use std::path::PathBuf;

use prodmt_core::models::CoreError;
use thiserror::Error;

/// Setup and reporting failures. Tool failures inside tasks never become one of these.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("could not determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("could not determine the program path: {0}")]
    CurrentExe(#[source] std::io::Error),

    #[error("invalid working directory {path:?}: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("working directory {path:?} is not a directory")]
    WorkdirNotADirectory { path: PathBuf },

    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to write launch report to {path:?}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize launch report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("launcher error: {0}")]
    Core(#[from] CoreError),
}

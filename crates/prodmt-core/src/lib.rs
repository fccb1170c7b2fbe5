//! Fan-out of Prodigal train-and-call runs, one task per input sequence file.
//!
//! [`orchestration::LaunchPlan`] turns an argument list into a working
//! directory and input references, [`orchestration::Launcher`] starts the
//! tasks, and [`execution`] owns the child processes.

pub mod execution;
pub mod models;
pub mod orchestration;
pub mod prodigal;

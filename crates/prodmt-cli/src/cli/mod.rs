//! Command line layer: argument parsing (`args`), error types (`errors`),
//! and the launch-and-join flow (`runner`) on top of `prodmt_core`.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;

//! `prodigal-multi` entrypoint: parse args, run every input through Prodigal,
//! and pick the process exit status.

use std::process::ExitCode;

use clap::Parser;

mod cli;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();
    match cli::run(args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("prodigal-multi: {error}");
            ExitCode::FAILURE
        }
    }
}

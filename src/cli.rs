//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure and its subcommands. It only
//! depends on `clap` and the standard library so the build script can reuse
//! it to render the manual page.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Maximum number of jobs accepted by the CLI.
const MAX_JOBS: usize = 64;

fn parse_jobs(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("{s} is not a valid number"))?;
    if (1..=MAX_JOBS).contains(&value) {
        Ok(value)
    } else {
        Err(format!("jobs must be between 1 and {MAX_JOBS}"))
    }
}

/// Build SGX enclave manifests for a test directory and run its tests.
#[derive(Debug, Clone, Parser)]
#[command(name = "enclave-test", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the test configuration, relative to the test directory.
    #[arg(short, long, value_name = "FILE", default_value = "tests.toml")]
    pub config: PathBuf,

    /// Run as if started in this directory.
    #[arg(short = 'C', long, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Build and run tests inside SGX enclaves.
    ///
    /// `SGX=1` in the environment has the same effect; `0`, `no`, `false`,
    /// `off` and the empty string leave it disabled.
    #[arg(long, env = "SGX", value_parser = clap::builder::FalseyValueParser::new())]
    pub sgx: bool,

    /// Set the number of parallel build jobs.
    #[arg(short, long, value_name = "N", value_parser = parse_jobs)]
    pub jobs: Option<usize>,

    /// Enable verbose logging output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Enclave signing key.
    #[arg(long, value_name = "FILE", env = "ENCLAVE_TEST_KEY")]
    pub key: Option<PathBuf>,

    /// Package library root that `binary_install_dir` is relative to.
    #[arg(long, value_name = "DIR", env = "ENCLAVE_TEST_PKGLIBDIR")]
    pub pkglibdir: Option<PathBuf>,

    /// Architecture library directory passed to manifest templates.
    #[arg(long, value_name = "DIR")]
    pub arch_libdir: Option<PathBuf>,

    /// Optional subcommand to execute; the runner builds when it is omitted.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Arguments accepted by the `build` command.
#[derive(Debug, Args, PartialEq, Eq, Clone, Default)]
pub struct BuildArgs {
    /// Regenerate the build file even if it already exists.
    #[arg(short, long)]
    pub force: bool,

    /// Targets to build; defaults to `sgx` or `direct` depending on the mode.
    pub targets: Vec<String>,
}

/// Available top-level commands.
#[derive(Debug, Subcommand, PartialEq, Eq, Clone)]
pub enum Commands {
    /// Generate the build file if it is missing.
    Generate {
        /// Regenerate the build file even if it already exists.
        #[arg(short, long)]
        force: bool,
    },

    /// Build manifests for the selected mode (or the given targets).
    Build(BuildArgs),

    /// Build manifests for the selected mode, then run pytest.
    Pytest {
        /// Arguments passed to pytest unchanged.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Remove generated manifests, signatures and tokens.
    Clean,

    /// Write the Ninja build file to the given path without invoking Ninja.
    Manifest {
        /// Output path for the generated Ninja file.
        ///
        /// Use `-` to write to stdout.
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

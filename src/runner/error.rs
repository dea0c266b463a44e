//! Error types for the runner module.
//!
//! This submodule isolates derive-macro-affected code to scope lint suppressions
//! narrowly.

// FIXME(rust-lang/rust#130021): remove once upstream is fixed.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use camino::Utf8PathBuf;
use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while driving external programs.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// A path given on the command line is not valid UTF-8.
    #[error("path {} is not valid UTF-8", path.display())]
    #[diagnostic(code(enclave_test::runner::non_utf8_path))]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },

    /// The program could not be started at all.
    #[error("failed to start {program}")]
    #[diagnostic(
        code(enclave_test::runner::spawn),
        help("check that the program is installed and on PATH")
    )]
    Spawn {
        /// Program that failed to start.
        program: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The program ran but reported failure.
    #[error("{program} exited with {}", code.map_or_else(|| "a signal".to_owned(), |c| format!("status {c}")))]
    #[diagnostic(code(enclave_test::runner::tool_failed))]
    ToolFailed {
        /// Program that failed.
        program: Utf8PathBuf,
        /// Exit status, or `None` when terminated by a signal.
        code: Option<i32>,
    },
}

impl RunnerError {
    /// Exit status this process should finish with.
    ///
    /// A failed tool's own status is passed through when it fits in a process
    /// exit code; every other failure maps to `1`.
    ///
    /// # Examples
    /// ```
    /// use enclave_test::runner::RunnerError;
    /// let err = RunnerError::ToolFailed { program: "ninja".into(), code: Some(3) };
    /// assert_eq!(err.exit_code(), 3);
    /// ```
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ToolFailed {
                code: Some(code), ..
            } => u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1),
            _ => 1,
        }
    }
}

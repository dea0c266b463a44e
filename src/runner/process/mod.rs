//! Process helpers for launching Ninja and pytest.
//! Internal to `runner`; public API is re-exported from `runner/mod.rs`.
//!
//! Both programs inherit the terminal so their progress output reaches the
//! user unchanged. The caller waits for completion and turns a non-zero
//! status into [`RunnerError::ToolFailed`].

use super::{NINJA_PROGRAM, PYTHON_PROGRAM, RunContext, RunnerError};
use camino::{Utf8Path, Utf8PathBuf};
use runner_env::{NINJA_ENV, PYTHON_ENV, SGX_MODE_ENV};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use tracing::info;

mod file_io;

pub use file_io::*;

/// Resolve a program path from `var`, falling back to `default` when the
/// variable is unset or not valid UTF-8.
pub(super) fn resolve_program_with<F>(var: &str, default: &str, mut read_env: F) -> Utf8PathBuf
where
    F: FnMut(&str) -> Option<OsString>,
{
    read_env(var)
        .filter(|value| !value.is_empty())
        .and_then(|value| Utf8PathBuf::from_path_buf(PathBuf::from(value)).ok())
        .unwrap_or_else(|| Utf8PathBuf::from(default))
}

/// Resolve the Ninja executable, honouring [`NINJA_ENV`].
pub(super) fn resolve_ninja_program_with<F>(read_env: F) -> Utf8PathBuf
where
    F: FnMut(&str) -> Option<OsString>,
{
    resolve_program_with(NINJA_ENV, NINJA_PROGRAM, read_env)
}

/// Resolve the Python interpreter, honouring [`PYTHON_ENV`].
pub(super) fn resolve_python_program_with<F>(read_env: F) -> Utf8PathBuf
where
    F: FnMut(&str) -> Option<OsString>,
{
    resolve_program_with(PYTHON_ENV, PYTHON_PROGRAM, read_env)
}

/// Specifies whether Ninja should run a build or invoke a tool subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NinjaCommandType<'a> {
    /// Standard build invocation with the given targets.
    Build(&'a [String]),
    /// Tool invocation via `ninja -t <tool>`.
    Tool(&'a str),
}

fn ninja_command(ctx: &RunContext, command_type: NinjaCommandType<'_>) -> Command {
    let mut cmd = Command::new(&ctx.ninja);
    cmd.current_dir(&ctx.workdir);
    cmd.arg("-f").arg(&ctx.build_file);
    if let Some(jobs) = ctx.jobs {
        cmd.arg("-j").arg(jobs.to_string());
    }
    match command_type {
        NinjaCommandType::Build(targets) => {
            cmd.args(targets);
        }
        NinjaCommandType::Tool(tool) => {
            cmd.arg("-t").arg(tool);
        }
    }
    cmd
}

fn pytest_command(ctx: &RunContext, args: &[String]) -> Command {
    let mut cmd = Command::new(&ctx.python);
    cmd.current_dir(&ctx.workdir);
    cmd.arg("-m").arg("pytest").args(args);
    cmd.env(SGX_MODE_ENV, if ctx.sgx { "1" } else { "" });
    cmd
}

fn log_command_execution(cmd: &Command) {
    let args: Vec<String> = cmd
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    info!(
        "Running command: {} {}",
        cmd.get_program().to_string_lossy(),
        args.join(" ")
    );
}

fn check_exit_status(program: &Utf8Path, status: ExitStatus) -> Result<(), RunnerError> {
    if status.success() {
        Ok(())
    } else {
        Err(RunnerError::ToolFailed {
            program: program.to_owned(),
            code: status.code(),
        })
    }
}

fn run_to_completion(mut cmd: Command, program: &Utf8Path) -> Result<(), RunnerError> {
    log_command_execution(&cmd);
    let status = cmd.status().map_err(|source| RunnerError::Spawn {
        program: program.to_owned(),
        source,
    })?;
    check_exit_status(program, status)
}

/// Invoke Ninja in the test directory and wait for it.
///
/// # Errors
///
/// Returns [`RunnerError::Spawn`] when Ninja cannot be started and
/// [`RunnerError::ToolFailed`] when it exits unsuccessfully.
pub fn run_ninja(ctx: &RunContext, command_type: NinjaCommandType<'_>) -> Result<(), RunnerError> {
    run_to_completion(ninja_command(ctx, command_type), &ctx.ninja)
}

/// Run `python -m pytest` in the test directory with `SGX` describing the
/// selected mode.
///
/// # Errors
///
/// As for [`run_ninja`].
pub fn run_pytest(ctx: &RunContext, args: &[String]) -> Result<(), RunnerError> {
    run_to_completion(pytest_command(ctx, args), &ctx.python)
}

//! CLI execution and command dispatch logic.
//!
//! This module keeps `main` minimal by providing a single entry point that
//! handles command execution. Every command first makes sure `build.ninja`
//! exists in the test directory, then hands the actual work to Ninja (and,
//! for `pytest`, to the Python test runner). Once the file exists Ninja owns
//! its freshness through the generator rule.

mod error;
mod process;

pub use error::RunnerError;
pub use process::{NinjaCommandType, is_stdout_path, run_ninja, run_pytest, write_ninja_file};

use crate::cli::{BuildArgs, Cli, Commands};
use crate::config::{HostContext, TestConfig};
use crate::graph::{DEFAULT_BUILD_FILE, GeneratorSettings, build_graph};
use crate::ninja_gen;
use crate::template::FsTemplateResolver;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default Ninja executable to invoke.
pub const NINJA_PROGRAM: &str = "ninja";
/// Default Python interpreter used to run pytest.
pub const PYTHON_PROGRAM: &str = "python3";
/// Environment variable override for the Ninja executable.
pub use runner_env::NINJA_ENV;
/// Environment variable override for the Python interpreter.
pub use runner_env::PYTHON_ENV;

/// Signing key used when `--key` is not given, relative to `$HOME`.
const HOME_KEY_PATH: &str = ".config/gramine/enclave-key.pem";

/// Wrapper around generated Ninja build file text.
#[derive(Debug, Clone)]
pub struct NinjaContent(String);
impl NinjaContent {
    /// Store the provided Ninja build file string.
    #[must_use]
    pub const fn new(content: String) -> Self {
        Self(content)
    }
    /// Borrow the underlying text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Everything a command needs, resolved once from the CLI and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Test directory; Ninja and pytest run here.
    pub workdir: Utf8PathBuf,
    /// Configuration file, relative to `workdir` unless absolute.
    pub config_path: Utf8PathBuf,
    /// Build file, relative to `workdir`.
    pub build_file: Utf8PathBuf,
    /// Host facts and installation paths.
    pub host: HostContext,
    /// Whether SGX mode is selected.
    pub sgx: bool,
    /// Parallel job count forwarded to Ninja.
    pub jobs: Option<usize>,
    /// Ninja executable.
    pub ninja: Utf8PathBuf,
    /// Python interpreter.
    pub python: Utf8PathBuf,
    /// Command line Ninja runs to regenerate the build file.
    pub regenerate_command: Vec<String>,
}

impl RunContext {
    /// Resolve the context for `cli`. `exe` is this program's own path and
    /// `read_env` supplies environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::NonUtf8Path`] when a path argument is not
    /// valid UTF-8.
    pub fn from_cli<F>(cli: &Cli, exe: &Path, mut read_env: F) -> Result<Self, RunnerError>
    where
        F: FnMut(&str) -> Option<OsString>,
    {
        let workdir = cli
            .directory
            .as_deref()
            .map(utf8)
            .transpose()?
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        let config_path = utf8(&cli.config)?;

        let mut host = HostContext::current();
        host.key = cli
            .key
            .as_deref()
            .map(utf8)
            .transpose()?
            .unwrap_or_else(|| default_key(read_env("HOME")));
        if let Some(root) = &cli.pkglibdir {
            host.pkglib_root = utf8(root)?;
        }
        if let Some(dir) = &cli.arch_libdir {
            host.arch_libdir = utf8(dir)?;
        }

        let ninja = process::resolve_ninja_program_with(&mut read_env);
        let python = process::resolve_python_program_with(&mut read_env);

        let regenerate_command = vec![
            utf8(exe)?.into_string(),
            "--config".to_owned(),
            config_path.to_string(),
            "--key".to_owned(),
            host.key.to_string(),
            "--pkglibdir".to_owned(),
            host.pkglib_root.to_string(),
            "--arch-libdir".to_owned(),
            host.arch_libdir.to_string(),
            "generate".to_owned(),
            "--force".to_owned(),
        ];

        Ok(Self {
            workdir,
            config_path,
            build_file: Utf8PathBuf::from(DEFAULT_BUILD_FILE),
            host,
            sgx: cli.sgx,
            jobs: cli.jobs,
            ninja,
            python,
            regenerate_command,
        })
    }

    /// Resolve `path` against the test directory.
    #[must_use]
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.workdir.join(path)
    }

    /// The aggregate target for the selected mode.
    #[must_use]
    pub const fn mode_target(&self) -> &'static str {
        if self.sgx { "sgx" } else { "direct" }
    }

    fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            build_file: self.build_file.clone(),
            ..GeneratorSettings::new(self.regenerate_command.clone())
        }
    }
}

fn utf8(path: &Path) -> Result<Utf8PathBuf, RunnerError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|path| RunnerError::NonUtf8Path { path })
}

fn default_key(home: Option<OsString>) -> Utf8PathBuf {
    home.filter(|home| !home.is_empty())
        .and_then(|home| Utf8PathBuf::from_path_buf(PathBuf::from(home)).ok())
        .map_or_else(
            || Utf8PathBuf::from("enclave-key.pem"),
            |home| home.join(HOME_KEY_PATH),
        )
}

/// Execute the parsed [`Cli`] command.
///
/// # Errors
///
/// Returns an error if build file generation fails or a launched program
/// fails. A failing program surfaces as [`RunnerError::ToolFailed`] so the
/// caller can propagate its exit status.
pub fn run(cli: &Cli) -> Result<()> {
    let exe = env::current_exe().context("locating the enclave-test executable")?;
    let ctx = RunContext::from_cli(cli, &exe, |key| env::var_os(key))?;
    debug!(workdir = %ctx.workdir, sgx = ctx.sgx, "resolved run context");

    // A bare invocation builds the selected mode.
    let command = cli
        .command
        .clone()
        .unwrap_or_else(|| Commands::Build(BuildArgs::default()));
    match command {
        Commands::Generate { force } => ensure_build_file(&ctx, force),
        Commands::Build(args) => handle_build(&ctx, &args),
        Commands::Pytest { args } => handle_pytest(&ctx, &args),
        Commands::Clean => handle_clean(&ctx),
        Commands::Manifest { file } => handle_manifest(&ctx, &file),
    }
}

/// Write the build file unless it already exists. With `force` it is always
/// rewritten.
///
/// The new file replaces the old one atomically; a failure while loading the
/// configuration or generating leaves any existing file untouched.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the graph cannot
/// be built, or the file cannot be written.
pub fn ensure_build_file(ctx: &RunContext, force: bool) -> Result<()> {
    let path = ctx.resolve(&ctx.build_file);
    if !force && path.is_file() {
        debug!(path = %path, "build file exists; Ninja keeps it fresh");
        return Ok(());
    }
    info!("generating {path}");
    let ninja = generate_ninja(ctx)?;
    write_ninja_file(&path, &ninja)
}

fn handle_build(ctx: &RunContext, args: &BuildArgs) -> Result<()> {
    ensure_build_file(ctx, args.force)?;
    let targets = if args.targets.is_empty() {
        vec![ctx.mode_target().to_owned()]
    } else {
        args.targets.clone()
    };
    run_ninja(ctx, NinjaCommandType::Build(&targets))?;
    Ok(())
}

fn handle_pytest(ctx: &RunContext, args: &[String]) -> Result<()> {
    ensure_build_file(ctx, false)?;
    let target = [ctx.mode_target().to_owned()];
    run_ninja(ctx, NinjaCommandType::Build(&target))?;
    run_pytest(ctx, args)?;
    Ok(())
}

fn handle_clean(ctx: &RunContext) -> Result<()> {
    ensure_build_file(ctx, false)?;
    run_ninja(ctx, NinjaCommandType::Tool("clean"))?;
    Ok(())
}

fn handle_manifest(ctx: &RunContext, file: &Path) -> Result<()> {
    let ninja = generate_ninja(ctx)?;
    if is_stdout_path(file) {
        process::write_ninja_stdout(&ninja)
    } else {
        write_ninja_file(&ctx.resolve(&utf8(file)?), &ninja)
    }
}

/// Generate the Ninja build file text for the test directory in `ctx`.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or translated.
pub fn generate_ninja(ctx: &RunContext) -> Result<NinjaContent> {
    let config = TestConfig::load_in(&ctx.workdir, &ctx.config_path, &ctx.host)
        .with_context(|| format!("loading {}", ctx.resolve(&ctx.config_path)))?;
    if tracing::enabled!(tracing::Level::DEBUG) {
        let json = serde_json::to_string_pretty(&config)
            .context("serialising test configuration")?;
        debug!("configuration:\n{json}");
    }

    let resolver = FsTemplateResolver::new(ctx.workdir.clone());
    let graph = build_graph(&config, &resolver, &ctx.generator_settings())
        .context("building the test graph")?;
    let ninja = ninja_gen::generate(&graph).context("generating the Ninja file")?;
    Ok(NinjaContent::new(ninja))
}

//! Test utilities for process management.
//!
//! This crate provides fake `ninja` and `python3` executables that record
//! how they were invoked, plus a helper that lays out a test directory.

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Make a script file executable on Unix platforms.
#[cfg(unix)]
fn make_script_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .with_context(|| format!("read metadata {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
        .with_context(|| format!("set permissions {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_script_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// A fake executable living in its own temporary directory.
///
/// Each invocation appends one line to [`FakeTool::log_path`]: the value of
/// `SGX` (or `unset`) followed by the arguments, separated by spaces.
pub struct FakeTool {
    dir: TempDir,
    path: Utf8PathBuf,
}

impl FakeTool {
    fn create(name: &str, body: &str) -> Result<Self> {
        let dir = TempDir::new().context("create temp dir for fake tool")?;
        let root = Utf8Path::from_path(dir.path())
            .ok_or_else(|| anyhow!("temp dir {} is not UTF-8", dir.path().display()))?;
        let path = root.join(name);
        let log = root.join(format!("{name}.log"));
        let mut file =
            File::create(&path).with_context(|| format!("create script {path}"))?;
        writeln!(
            file,
            "#!/bin/sh\necho \"SGX=${{SGX-unset}} $*\" >> '{log}'\n{body}"
        )
        .with_context(|| format!("write script {path}"))?;
        drop(file);
        make_script_executable(path.as_std_path())?;
        Ok(Self { dir, path })
    }

    /// Path of the executable.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Path of the invocation log.
    #[must_use]
    pub fn log_path(&self) -> Utf8PathBuf {
        let name = self.path.file_name().unwrap_or("tool");
        self.path.with_file_name(format!("{name}.log"))
    }

    /// Recorded invocations, oldest first. Empty when never run.
    ///
    /// # Errors
    ///
    /// Returns an error when the log exists but cannot be read.
    pub fn invocations(&self) -> Result<Vec<String>> {
        let log = self.log_path();
        if !log.is_file() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&log).with_context(|| format!("read {log}"))?;
        Ok(text.lines().map(str::to_owned).collect())
    }

    /// Directory holding the tool; removed on drop.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Create a fake Ninja that exits with `exit_code`.
///
/// The script fails with status `90` when the build file passed through `-f`
/// does not exist in its working directory, so tests notice a missing file.
///
/// # Errors
///
/// Returns an error when the script cannot be written.
pub fn fake_ninja(exit_code: i32) -> Result<FakeTool> {
    let body = format!(
        "build_file=build.ninja\n\
         while [ $# -gt 0 ]; do\n\
         \x20 if [ \"$1\" = -f ]; then build_file=\"$2\"; fi\n\
         \x20 shift\n\
         done\n\
         [ -f \"$build_file\" ] || exit 90\n\
         exit {exit_code}"
    );
    FakeTool::create("ninja", &body)
}

/// Create a fake Python interpreter that exits with `exit_code`.
///
/// # Errors
///
/// Returns an error when the script cannot be written.
pub fn fake_python(exit_code: i32) -> Result<FakeTool> {
    FakeTool::create("python3", &format!("exit {exit_code}"))
}

/// Create a temporary test directory containing `tests.toml` with `config`
/// and a `manifest.template`.
///
/// # Errors
///
/// Returns an error when the directory or files cannot be created.
pub fn test_dir(config: &str) -> Result<(TempDir, Utf8PathBuf)> {
    let dir = TempDir::new().context("create test dir")?;
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .map_err(|p| anyhow!("temp dir {} is not UTF-8", p.display()))?;
    fs::write(root.join("tests.toml"), config).context("write tests.toml")?;
    fs::write(root.join("manifest.template"), "loader.entrypoint = \"{{ entrypoint }}\"\n")
        .context("write manifest.template")?;
    Ok((dir, root))
}

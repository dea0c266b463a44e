//! File creation helpers for the runner.
//! Build files are replaced atomically so a failed run never leaves a
//! truncated file behind.

use crate::runner::NinjaContent;
use anyhow::{Context, Result as AnyResult};
use camino::Utf8Path;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::Builder;
use tracing::info;

/// Return `true` when `path` is the CLI sentinel indicating "write to stdout".
#[must_use]
pub fn is_stdout_path(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Write `content` to `path` through a sibling temporary file that is renamed
/// into place once fully synced.
///
/// # Errors
///
/// Returns an error when the parent directory cannot be created or the file
/// cannot be written, synced or renamed.
pub fn write_ninja_file(path: &Utf8Path, content: &NinjaContent) -> AnyResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("creating directory {parent}"))?;

    let mut tmp = Builder::new()
        .prefix(".enclave-test.")
        .suffix(".ninja.tmp")
        .tempfile_in(parent)
        .with_context(|| format!("creating temporary file in {parent}"))?;
    {
        let handle = tmp.as_file_mut();
        handle
            .write_all(content.as_str().as_bytes())
            .with_context(|| format!("writing {path}"))?;
        handle.flush().with_context(|| format!("flushing {path}"))?;
        set_readable(handle).with_context(|| format!("setting permissions on {path}"))?;
        handle.sync_all().with_context(|| format!("syncing {path}"))?;
    }
    tmp.persist(path)
        .with_context(|| format!("replacing {path}"))?;
    info!("Wrote Ninja file to {path}");
    Ok(())
}

#[cfg(unix)]
fn set_readable(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_readable(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

fn is_broken_pipe(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
}

fn write_all_ignoring_broken_pipe(writer: &mut impl Write, buf: &[u8]) -> io::Result<()> {
    match writer.write_all(buf) {
        Ok(()) => Ok(()),
        Err(err) if is_broken_pipe(&err) => Ok(()),
        Err(err) => Err(err),
    }
}

fn flush_ignoring_broken_pipe(writer: &mut impl Write) -> io::Result<()> {
    match writer.flush() {
        Ok(()) => Ok(()),
        Err(err) if is_broken_pipe(&err) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Write `content` to stdout. A reader that closes the pipe early is not an
/// error.
///
/// # Errors
///
/// Returns an error for any write failure other than a broken pipe.
pub fn write_ninja_stdout(content: &NinjaContent) -> AnyResult<()> {
    let mut stdout = io::stdout().lock();
    write_all_ignoring_broken_pipe(&mut stdout, content.as_str().as_bytes())
        .context("writing Ninja file to stdout")?;
    flush_ignoring_broken_pipe(&mut stdout).context("flushing stdout")?;
    Ok(())
}

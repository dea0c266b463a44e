//! Test configuration loading.
//!
//! Reads a `tests.toml` file into a [`TestConfig`]. Every recognised section
//! is optional: a missing `manifests`, `arch.<id>`, `sgx` or `no_binary` key
//! simply yields an empty list. Unknown keys are ignored because the same file
//! also carries settings consumed by the test suite itself.
//!
//! ```toml
//! manifests = ["helloworld", "exit"]
//! binary_install_dir = "tests/regression"
//! no_binary = ["exit"]
//!
//! [arch.x86_64]
//! manifests = ["cpuid"]
//!
//! [sgx]
//! manifests = ["attestation"]
//! ```
//!
//! Values that the file cannot provide (host processor, package library root,
//! signing key) are passed in explicitly through a [`HostContext`].

use crate::graph::{ARTIFACT_SUFFIXES, DEFAULT_BUILD_FILE, DIRECT_TARGET, SGX_TARGET};
use crate::template::DEFAULT_TEMPLATE;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::fs;
use tracing::debug;

mod error;
mod raw;

pub use error::ConfigError;

use raw::RawConfig;

/// Default configuration file name, relative to the test directory.
pub const DEFAULT_CONFIG_FILE: &str = "tests.toml";

/// Host facts and installation paths the configuration file does not carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostContext {
    /// Processor identifier used to select `arch.<id>` sections.
    pub arch: String,
    /// Package library root that `binary_install_dir` is relative to.
    pub pkglib_root: Utf8PathBuf,
    /// Architecture library directory exported to manifests as `ARCH_LIBDIR`.
    pub arch_libdir: Utf8PathBuf,
    /// Enclave signing key.
    pub key: Utf8PathBuf,
}

impl HostContext {
    /// Describe a Linux host with the given processor identifier, using the
    /// conventional multiarch directories for it.
    ///
    /// # Examples
    /// ```
    /// use enclave_test::config::HostContext;
    /// let host = HostContext::for_arch("x86_64");
    /// assert_eq!(host.arch_libdir.as_str(), "/lib/x86_64-linux-gnu/");
    /// ```
    #[must_use]
    pub fn for_arch(arch: impl Into<String>) -> Self {
        let arch = arch.into();
        Self {
            pkglib_root: Utf8PathBuf::from(format!("/usr/local/lib/{arch}-linux-gnu/gramine")),
            arch_libdir: Utf8PathBuf::from(format!("/lib/{arch}-linux-gnu/")),
            key: Utf8PathBuf::from("enclave-key.pem"),
            arch,
        }
    }

    /// Describe the machine this process runs on.
    #[must_use]
    pub fn current() -> Self {
        Self::for_arch(std::env::consts::ARCH)
    }

    /// Replace the signing key path.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Utf8PathBuf>) -> Self {
        self.key = key.into();
        self
    }

    /// Replace the package library root.
    #[must_use]
    pub fn with_pkglib_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.pkglib_root = root.into();
        self
    }

    /// Replace the architecture library directory.
    #[must_use]
    pub fn with_arch_libdir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.arch_libdir = dir.into();
        self
    }
}

/// Parsed and validated test configuration.
///
/// Name lists keep their first-seen order and never contain duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestConfig {
    manifests: IndexSet<String>,
    sgx_manifests: IndexSet<String>,
    no_binary: IndexSet<String>,
    binary_install_dir: Option<Utf8PathBuf>,
    binary_path: Option<Utf8PathBuf>,
    key: Utf8PathBuf,
    arch_libdir: Utf8PathBuf,
    source_path: Utf8PathBuf,
}

impl TestConfig {
    /// Read and parse the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] when the file is missing,
    /// [`ConfigError::Read`] for other I/O failures, and the errors of
    /// [`TestConfig::from_toml`] for invalid contents.
    pub fn load(path: &Utf8Path, host: &HostContext) -> Result<Self, ConfigError> {
        Self::load_in(Utf8Path::new(""), path, host)
    }

    /// Read `dir/path` but record `path` as the source, so the configuration
    /// can be referenced relative to the directory the build runs in.
    ///
    /// # Errors
    ///
    /// As for [`TestConfig::load`].
    pub fn load_in(dir: &Utf8Path, path: &Utf8Path, host: &HostContext) -> Result<Self, ConfigError> {
        let full = dir.join(path);
        let source = fs::read_to_string(&full).map_err(|err| ConfigError::from_io(&full, err))?;
        let config = Self::from_toml(&source, path, host)?;
        debug!(
            path = %full,
            manifests = config.manifests.len(),
            sgx_manifests = config.sgx_manifests.len(),
            "loaded test configuration"
        );
        Ok(config)
    }

    /// Parse configuration text. `path` is recorded as the configuration's
    /// source and used in diagnostics; it is not read.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or mistyped keys and
    /// [`ConfigError::InvalidName`] for names that cannot be build targets,
    /// including names whose targets clash with `direct`, `sgx`, the build
    /// file, or the targets derived from another name.
    ///
    /// # Examples
    /// ```
    /// use camino::Utf8Path;
    /// use enclave_test::config::{HostContext, TestConfig};
    ///
    /// let host = HostContext::for_arch("x86_64");
    /// let config = TestConfig::from_toml(
    ///     "manifests = [\"a\"]\n[sgx]\nmanifests = [\"b\"]\n",
    ///     Utf8Path::new("tests.toml"),
    ///     &host,
    /// )
    /// .unwrap();
    /// assert_eq!(config.all_manifests().into_iter().collect::<Vec<_>>(), ["a", "b"]);
    /// ```
    pub fn from_toml(source: &str, path: &Utf8Path, host: &HostContext) -> Result<Self, ConfigError> {
        let mut raw: RawConfig =
            toml::from_str(source).map_err(|err| ConfigError::from_toml(path, source, &err))?;

        let mut manifests: IndexSet<String> = raw.manifests.into_iter().collect();
        if let Some(section) = raw.arch.remove(&host.arch) {
            manifests.extend(section.manifests);
        }
        let sgx_manifests: IndexSet<String> = raw.sgx.manifests.into_iter().collect();
        let no_binary: IndexSet<String> = raw.no_binary.into_iter().collect();

        for name in manifests.iter().chain(&sgx_manifests).chain(&no_binary) {
            validate_name(path, name)?;
        }
        reject_collisions(path, host, manifests.iter().chain(&sgx_manifests))?;

        let binary_path = raw
            .binary_install_dir
            .as_ref()
            .map(|dir| host.pkglib_root.join(dir));

        Ok(Self {
            manifests,
            sgx_manifests,
            no_binary,
            binary_install_dir: raw.binary_install_dir,
            binary_path,
            key: host.key.clone(),
            arch_libdir: host.arch_libdir.clone(),
            source_path: path.to_owned(),
        })
    }

    /// Manifests built in both direct and SGX mode, including those from the
    /// matching `arch.<id>` section.
    #[must_use]
    pub const fn manifests(&self) -> &IndexSet<String> {
        &self.manifests
    }

    /// Manifests built only in SGX mode.
    #[must_use]
    pub const fn sgx_manifests(&self) -> &IndexSet<String> {
        &self.sgx_manifests
    }

    /// Names without a test binary of their own.
    #[must_use]
    pub const fn no_binary(&self) -> &IndexSet<String> {
        &self.no_binary
    }

    /// Whether `name` is listed under `no_binary`.
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        self.no_binary.contains(name)
    }

    /// Plain manifests followed by SGX-only manifests, without duplicates.
    #[must_use]
    pub fn all_manifests(&self) -> IndexSet<&str> {
        self.manifests
            .iter()
            .chain(&self.sgx_manifests)
            .map(String::as_str)
            .collect()
    }

    /// Value of `binary_install_dir` as written in the file.
    #[must_use]
    pub fn binary_install_dir(&self) -> Option<&Utf8Path> {
        self.binary_install_dir.as_deref()
    }

    /// Directory holding installed test binaries, when configured.
    #[must_use]
    pub fn binary_path(&self) -> Option<&Utf8Path> {
        self.binary_path.as_deref()
    }

    /// Enclave signing key.
    #[must_use]
    pub fn key(&self) -> &Utf8Path {
        &self.key
    }

    /// Architecture library directory.
    #[must_use]
    pub fn arch_libdir(&self) -> &Utf8Path {
        &self.arch_libdir
    }

    /// Path the configuration was loaded from.
    #[must_use]
    pub fn source_path(&self) -> &Utf8Path {
        &self.source_path
    }
}

fn validate_name(path: &Utf8Path, name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains(['\n', '\r']) {
        Some("name contains a line break")
    } else if name.contains('\0') {
        Some("name contains a NUL character")
    } else if name.contains('|') {
        Some("name contains `|`, which Ninja cannot escape")
    } else {
        None
    };
    reason.map_or(Ok(()), |reason| {
        Err(ConfigError::InvalidName {
            path: path.to_owned(),
            name: name.to_owned(),
            reason,
        })
    })
}

/// Reject names whose build targets clash with the fixed targets or with the
/// targets of another name.
fn reject_collisions<'a>(
    path: &Utf8Path,
    host: &HostContext,
    names: impl Iterator<Item = &'a String>,
) -> Result<(), ConfigError> {
    let reserved = [
        DIRECT_TARGET,
        SGX_TARGET,
        DEFAULT_BUILD_FILE,
        DEFAULT_TEMPLATE,
        path.as_str(),
        host.key.as_str(),
    ];
    let mut owners: IndexMap<String, Option<&str>> = reserved
        .into_iter()
        .map(|target| (target.to_owned(), None))
        .collect();
    for name in names {
        for target in name_targets(name) {
            match owners.get(&target).copied() {
                Some(None) => {
                    return Err(collision(path, name, "name clashes with a reserved target"));
                }
                Some(Some(owner)) if owner != name.as_str() => {
                    return Err(collision(
                        path,
                        name,
                        "name clashes with a target of another manifest",
                    ));
                }
                _ => {
                    owners.insert(target, Some(name.as_str()));
                }
            }
        }
    }
    Ok(())
}

/// Every identifier the build file defines or reads for `name`.
fn name_targets(name: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(name.to_owned())
        .chain(ARTIFACT_SUFFIXES.iter().map(move |suffix| format!("{name}{suffix}")))
        .chain([format!("{DIRECT_TARGET}-{name}"), format!("{SGX_TARGET}-{name}")])
}

fn collision(path: &Utf8Path, name: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidName {
        path: path.to_owned(),
        name: name.to_owned(),
        reason,
    }
}

//! Error types for test configuration loading.
//
// Module-level suppression for version-dependent lint false positives from
// miette/thiserror derive macros. FIXME(rust-lang/rust#130021): remove once
// upstream is fixed.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use camino::{Utf8Path, Utf8PathBuf};
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::io;
use thiserror::Error;

/// Errors raised while reading or interpreting `tests.toml`.
///
/// Every variant is fatal: no build graph is produced once one is returned.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("test configuration {path} not found")]
    #[diagnostic(
        code(enclave_test::config::not_found),
        help("run from the test directory or pass --config")
    )]
    NotFound {
        /// Path that was looked up.
        path: Utf8PathBuf,
    },

    /// The configuration file exists but could not be read.
    #[error("failed to read test configuration {path}")]
    #[diagnostic(code(enclave_test::config::read))]
    Read {
        /// Path that was read.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The file is not valid TOML or a recognised key has the wrong type.
    #[error("failed to parse test configuration {path}: {message}")]
    #[diagnostic(code(enclave_test::config::parse))]
    Parse {
        /// Path of the offending file.
        path: Utf8PathBuf,
        /// Parser message without location information.
        message: String,
        /// Full file contents for span rendering.
        #[source_code]
        src: NamedSource<String>,
        /// Byte span reported by the TOML parser, when available.
        #[label("here")]
        span: Option<SourceSpan>,
    },

    /// A manifest name cannot be used as a build file identifier.
    #[error("invalid manifest name {name:?} in {path}: {reason}")]
    #[diagnostic(code(enclave_test::config::invalid_name))]
    InvalidName {
        /// Path of the offending file.
        path: Utf8PathBuf,
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },
}

impl ConfigError {
    pub(super) fn from_io(path: &Utf8Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_owned(),
            }
        } else {
            Self::Read {
                path: path.to_owned(),
                source,
            }
        }
    }

    pub(super) fn from_toml(path: &Utf8Path, source: &str, err: &toml::de::Error) -> Self {
        let span = err
            .span()
            .map(|range| SourceSpan::new(range.start.into(), range.len()));
        Self::Parse {
            path: path.to_owned(),
            message: err.message().trim_end().to_owned(),
            src: NamedSource::new(path.as_str(), source.to_owned()),
            span,
        }
    }
}

//! Serde mirror of the `tests.toml` layout.

use camino::Utf8PathBuf;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct RawConfig {
    pub manifests: Vec<String>,
    pub arch: BTreeMap<String, RawSection>,
    pub sgx: RawSection,
    pub binary_install_dir: Option<Utf8PathBuf>,
    pub no_binary: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct RawSection {
    pub manifests: Vec<String>,
}

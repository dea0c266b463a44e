//! Manifest template lookup.
//!
//! Each manifest name may ship its own `<name>.manifest.template`; names
//! without one share `manifest.template`. Whether a per-name template exists
//! is asked of a [`TemplateResolver`], so the decision is made once while the
//! graph is built and can be simulated in tests without a filesystem.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeSet;

/// Template used by every name without a template of its own.
pub const DEFAULT_TEMPLATE: &str = "manifest.template";

/// Suffix appended to a manifest name to form its per-name template.
pub const TEMPLATE_SUFFIX: &str = ".manifest.template";

/// Answers whether a template file is present.
#[cfg_attr(test, mockall::automock)]
pub trait TemplateResolver {
    /// Return `true` when `path` names an existing template.
    fn template_exists(&self, path: &Utf8Path) -> bool;
}

/// Looks templates up on disk, relative to `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsTemplateResolver {
    root: Utf8PathBuf,
}

impl FsTemplateResolver {
    /// Resolve templates relative to `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateResolver for FsTemplateResolver {
    fn template_exists(&self, path: &Utf8Path) -> bool {
        self.root.join(path).is_file()
    }
}

/// A fixed set of templates known to exist.
///
/// # Examples
/// ```
/// use enclave_test::template::{KnownTemplates, resolve_template};
/// let known: KnownTemplates = ["a.manifest.template"].into_iter().collect();
/// assert_eq!(resolve_template(&known, "a").as_str(), "a.manifest.template");
/// assert_eq!(resolve_template(&known, "b").as_str(), "manifest.template");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownTemplates(BTreeSet<Utf8PathBuf>);

impl<P: Into<Utf8PathBuf>> FromIterator<P> for KnownTemplates {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl TemplateResolver for KnownTemplates {
    fn template_exists(&self, path: &Utf8Path) -> bool {
        self.0.contains(path)
    }
}

/// Pick the template for `name`: its own when present, the shared default
/// otherwise. The default is returned whether or not it exists.
#[must_use]
pub fn resolve_template(resolver: &dyn TemplateResolver, name: &str) -> Utf8PathBuf {
    let own = Utf8PathBuf::from(format!("{name}{TEMPLATE_SUFFIX}"));
    if resolver.template_exists(&own) {
        own
    } else {
        Utf8PathBuf::from(DEFAULT_TEMPLATE)
    }
}

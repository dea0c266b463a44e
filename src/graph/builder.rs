//! Test-configuration-to-graph conversion.
//!
//! For every manifest name the builder emits up to five statements:
//!
//! - `name: symlink <binary_path>/name` when binaries are installed elsewhere
//!   and the name has a binary,
//! - `name.manifest: manifest <template>`,
//! - `name.manifest.sgx | name.sig: sgx-sign name.manifest | <key> <binaries>`,
//! - `name.token: sgx-get-token name.sig`,
//! - the `direct-name` and `sgx-name` aliases.
//!
//! The signer measures every binary that lives next to the manifest, so each
//! signature depends on all test binaries rather than only its own.

use camino::Utf8PathBuf;
use indexmap::IndexSet;
use shell_quote::{QuoteRefExt, Sh};
use tracing::debug;

use super::{BuildGraph, BuildNode, GraphError, Rule, RuleKind};
use crate::config::TestConfig;
use crate::template::{TemplateResolver, resolve_template};

/// Build file written into the test directory.
pub const DEFAULT_BUILD_FILE: &str = "build.ninja";

/// Aggregate target for direct mode; also the default target.
pub const DIRECT_TARGET: &str = "direct";
/// Aggregate target for SGX mode.
pub const SGX_TARGET: &str = "sgx";
/// Suffixes of the files generated for each name, in pipeline order.
pub const ARTIFACT_SUFFIXES: [&str; 4] = [".manifest", ".manifest.sgx", ".sig", ".token"];
const ARCH_LIBDIR_VAR: &str = "ARCH_LIBDIR";
const KEY_VAR: &str = "KEY";
const ENTRYPOINT_VAR: &str = "ENTRYPOINT";

/// External programs invoked by the generated rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Manifest renderer.
    pub manifest: String,
    /// Manifest signer.
    pub sign: String,
    /// Token extractor.
    pub token: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            manifest: "gramine-manifest".to_owned(),
            sign: "gramine-sgx-sign".to_owned(),
            token: "gramine-sgx-get-token".to_owned(),
        }
    }
}

impl Toolchain {
    fn rules(&self, regenerate_command: String) -> Vec<Rule> {
        vec![
            Rule {
                kind: RuleKind::Symlink,
                command: "ln -sf $in $out".to_owned(),
                description: "symlink: $out".to_owned(),
                depfile: None,
                generator: false,
            },
            Rule {
                kind: RuleKind::Manifest,
                command: format!(
                    "{} -Darch_libdir=$ARCH_LIBDIR -Dentrypoint=$ENTRYPOINT $in $out",
                    self.manifest
                ),
                description: "manifest: $out".to_owned(),
                depfile: None,
                generator: false,
            },
            Rule {
                kind: RuleKind::SgxSign,
                command: format!(
                    "{} --manifest $in --key $KEY --depfile $out.d --output $out >/dev/null",
                    self.sign
                ),
                description: "SGX sign: $out".to_owned(),
                depfile: Some("$out.d".to_owned()),
                generator: false,
            },
            Rule {
                kind: RuleKind::SgxGetToken,
                command: format!("{} --sig $in --output $out", self.token),
                description: "SGX token: $out".to_owned(),
                depfile: None,
                generator: false,
            },
            Rule {
                kind: RuleKind::Regenerate,
                command: regenerate_command,
                description: "regenerate: $out".to_owned(),
                depfile: None,
                generator: true,
            },
        ]
    }
}

/// Settings that shape the generated file but do not come from `tests.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSettings {
    /// Path of the build file, relative to the test directory.
    pub build_file: Utf8PathBuf,
    /// Command line that regenerates the build file, one argument per entry.
    pub regenerate_command: Vec<String>,
    /// Programs used by the rules.
    pub toolchain: Toolchain,
}

impl GeneratorSettings {
    /// Settings writing [`DEFAULT_BUILD_FILE`] with the default toolchain.
    #[must_use]
    pub fn new(regenerate_command: Vec<String>) -> Self {
        Self {
            build_file: Utf8PathBuf::from(DEFAULT_BUILD_FILE),
            regenerate_command,
            toolchain: Toolchain::default(),
        }
    }
}

/// Builds a [`BuildGraph`] from a [`TestConfig`].
pub struct GraphBuilder<'a> {
    config: &'a TestConfig,
    resolver: &'a dyn TemplateResolver,
    settings: &'a GeneratorSettings,
}

impl<'a> GraphBuilder<'a> {
    /// Prepare a builder; nothing is computed until [`GraphBuilder::build`].
    #[must_use]
    pub fn new(
        config: &'a TestConfig,
        resolver: &'a dyn TemplateResolver,
        settings: &'a GeneratorSettings,
    ) -> Self {
        Self {
            config,
            resolver,
            settings,
        }
    }

    /// Compute the graph. Identical inputs always give an identical graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnquotableArgument`] when the regenerate command
    /// cannot be written to a shell command line. Any other [`GraphError`]
    /// means the computed graph violates its own invariants, which indicates
    /// a bug in the builder.
    pub fn build(&self) -> Result<BuildGraph, GraphError> {
        let names = self.config.all_manifests();
        let binaries: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| !self.config.is_excluded(name))
            .collect();

        let mut graph = BuildGraph::default();
        graph.variables.insert(
            ARCH_LIBDIR_VAR.to_owned(),
            self.config.arch_libdir().to_string(),
        );
        graph
            .variables
            .insert(KEY_VAR.to_owned(), self.config.key().to_string());
        graph.rules = self.settings.toolchain.rules(self.regenerate_command()?);

        self.push_aggregates(&mut graph, &names);
        for name in &names {
            self.push_name(&mut graph, name, &binaries);
        }
        self.push_regenerate(&mut graph);
        self.declare_externals(&mut graph, &binaries);

        graph.validate()?;
        debug!(
            names = names.len(),
            nodes = graph.nodes.len(),
            "built test graph"
        );
        Ok(graph)
    }

    fn push_aggregates(&self, graph: &mut BuildGraph, names: &IndexSet<&str>) {
        let plain = self.config.manifests();
        let direct_inputs = plain
            .iter()
            .filter(|name| !self.config.is_excluded(name))
            .map(Utf8PathBuf::from)
            .chain(plain.iter().map(|name| artifact(name, ".manifest")));
        graph
            .nodes
            .push(BuildNode::new(RuleKind::Phony, [DIRECT_TARGET]).with_inputs(direct_inputs));
        graph.default_target = Some(Utf8PathBuf::from(DIRECT_TARGET));

        let bare = names
            .iter()
            .filter(|name| !self.config.is_excluded(name))
            .map(Utf8PathBuf::from);
        let staged = ARTIFACT_SUFFIXES
            .into_iter()
            .flat_map(move |suffix| names.iter().map(move |name| artifact(name, suffix)));
        graph
            .nodes
            .push(BuildNode::new(RuleKind::Phony, [SGX_TARGET]).with_inputs(bare.chain(staged)));
    }

    fn push_name(&self, graph: &mut BuildGraph, name: &str, binaries: &[&str]) {
        if let Some(binary_path) = self.config.binary_path() {
            if !self.config.is_excluded(name) {
                graph.nodes.push(
                    BuildNode::new(RuleKind::Symlink, [name]).with_inputs([binary_path.join(name)]),
                );
            }
        }

        let manifest = artifact(name, ".manifest");
        let signed = artifact(name, ".manifest.sgx");
        let sig = artifact(name, ".sig");
        let token = artifact(name, ".token");
        let template = resolve_template(self.resolver, name);

        graph.nodes.push(
            BuildNode::new(RuleKind::Manifest, [manifest.clone()])
                .with_inputs([template])
                .with_variable(ENTRYPOINT_VAR, name),
        );

        let key = self.config.key().to_owned();
        let sign_deps = std::iter::once(key).chain(binaries.iter().copied().map(Utf8PathBuf::from));
        graph.nodes.push(
            BuildNode::new(RuleKind::SgxSign, [signed.clone()])
                .with_implicit_outputs([sig.clone()])
                .with_inputs([manifest.clone()])
                .with_implicit_inputs(sign_deps),
        );

        graph.nodes.push(
            BuildNode::new(RuleKind::SgxGetToken, [token.clone()]).with_inputs([sig.clone()]),
        );

        graph.nodes.push(
            BuildNode::new(RuleKind::Phony, [format!("{DIRECT_TARGET}-{name}")])
                .with_inputs([manifest.clone()]),
        );
        graph.nodes.push(
            BuildNode::new(RuleKind::Phony, [format!("{SGX_TARGET}-{name}")])
                .with_inputs([manifest, signed, sig, token]),
        );
    }

    fn push_regenerate(&self, graph: &mut BuildGraph) {
        graph.nodes.push(
            BuildNode::new(RuleKind::Regenerate, [self.settings.build_file.clone()])
                .with_inputs([self.config.source_path().to_owned()]),
        );
    }

    /// Record every file the graph reads but does not build: templates, the
    /// key, the configuration, and the binaries themselves (installed copies
    /// when a binary directory is configured, in-tree ones otherwise).
    fn declare_externals(&self, graph: &mut BuildGraph, binaries: &[&str]) {
        let templates: Vec<Utf8PathBuf> = graph
            .nodes
            .iter()
            .filter(|node| node.rule == RuleKind::Manifest)
            .flat_map(|node| node.inputs.iter().cloned())
            .collect();
        graph.externals.extend(templates);
        graph.externals.insert(self.config.key().to_owned());
        graph
            .externals
            .insert(self.config.source_path().to_owned());
        match self.config.binary_path() {
            Some(dir) => graph
                .externals
                .extend(binaries.iter().map(|name| dir.join(name))),
            None => graph
                .externals
                .extend(binaries.iter().copied().map(Utf8PathBuf::from)),
        }
    }

    /// Shell-quote each argument, then escape `$` so Ninja passes it through.
    fn regenerate_command(&self) -> Result<String, GraphError> {
        let args = self
            .settings
            .regenerate_command
            .iter()
            .map(|arg| quote_arg(arg).map(|quoted| quoted.replace('$', "$$")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(args.join(" "))
    }
}

/// Build the graph for `config` in one call.
///
/// # Errors
///
/// See [`GraphBuilder::build`].
pub fn build_graph(
    config: &TestConfig,
    resolver: &dyn TemplateResolver,
    settings: &GeneratorSettings,
) -> Result<BuildGraph, GraphError> {
    GraphBuilder::new(config, resolver, settings).build()
}

fn artifact(name: &str, suffix: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{name}{suffix}"))
}

fn quote_arg(arg: &str) -> Result<String, GraphError> {
    if arg.contains(['\n', '\r']) {
        return Err(GraphError::UnquotableArgument {
            arg: arg.to_owned(),
        });
    }
    let bytes: Vec<u8> = arg.quoted(Sh);
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            debug_assert!(false, "shell quoting produced non UTF-8 bytes: {err}");
            Ok(String::from_utf8_lossy(&err.into_bytes()).into_owned())
        }
    }
}

//! Build graph structures.
//!
//! This module defines the in-memory graph produced for a test configuration
//! before it is written out as Ninja syntax. A [`BuildGraph`] holds the
//! top-level variables, the rule definitions, and an ordered list of
//! [`BuildNode`]s. The order of nodes is the order in which they are emitted.
//!
//! # Examples
//!
//! ```
//! use enclave_test::graph::{BuildGraph, BuildNode, RuleKind};
//!
//! let mut graph = BuildGraph::default();
//! graph.nodes.push(BuildNode::new(RuleKind::Phony, ["all"]).with_inputs(["in"]));
//! graph.externals.insert("in".into());
//! graph.default_target = Some("all".into());
//! assert!(graph.validate().is_ok());
//! ```

mod builder;

pub use builder::{
    ARTIFACT_SUFFIXES, DEFAULT_BUILD_FILE, DIRECT_TARGET, GeneratorSettings, GraphBuilder,
    SGX_TARGET, Toolchain, build_graph,
};

use camino::Utf8PathBuf;
use indexmap::{IndexMap, IndexSet};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// The fixed set of rules a test build file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    /// Link an installed test binary into the test directory.
    Symlink,
    /// Render a manifest from its template.
    Manifest,
    /// Sign a manifest, producing the SGX manifest and its signature.
    SgxSign,
    /// Extract a launch token from a signature.
    SgxGetToken,
    /// Ninja's built-in grouping rule.
    Phony,
    /// Re-run generation to refresh the build file itself.
    Regenerate,
}

impl RuleKind {
    /// Name of the rule as written in the build file.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Symlink => "symlink",
            Self::Manifest => "manifest",
            Self::SgxSign => "sgx-sign",
            Self::SgxGetToken => "sgx-get-token",
            Self::Phony => "phony",
            Self::Regenerate => "regenerate",
        }
    }
}

impl Display for RuleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A rule definition with its command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Which rule this defines.
    pub kind: RuleKind,
    /// Command template; may reference `$in`, `$out` and variables.
    pub command: String,
    /// Status line shown while the rule runs.
    pub description: String,
    /// Dependency file written by the command, if any.
    pub depfile: Option<String>,
    /// Marks the rule as regenerating the build file.
    pub generator: bool,
}

/// One build statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNode {
    /// Explicit outputs.
    pub outputs: Vec<Utf8PathBuf>,
    /// Rule producing the outputs.
    pub rule: RuleKind,
    /// Explicit inputs, available to the command as `$in`.
    pub inputs: Vec<Utf8PathBuf>,
    /// Inputs that trigger a rebuild but are not part of `$in`.
    pub implicit_inputs: Vec<Utf8PathBuf>,
    /// Outputs produced alongside the explicit ones but not part of `$out`.
    pub implicit_outputs: Vec<Utf8PathBuf>,
    /// Per-statement variable bindings.
    pub variables: IndexMap<String, String>,
}

impl BuildNode {
    /// Create a node with no inputs.
    #[must_use]
    pub fn new<I, P>(rule: RuleKind, outputs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        Self {
            outputs: collect_paths(outputs),
            rule,
            inputs: Vec::new(),
            implicit_inputs: Vec::new(),
            implicit_outputs: Vec::new(),
            variables: IndexMap::new(),
        }
    }

    /// Set the explicit inputs.
    #[must_use]
    pub fn with_inputs<I, P>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.inputs = collect_paths(inputs);
        self
    }

    /// Set the implicit inputs.
    #[must_use]
    pub fn with_implicit_inputs<I, P>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.implicit_inputs = collect_paths(inputs);
        self
    }

    /// Set the implicit outputs.
    #[must_use]
    pub fn with_implicit_outputs<I, P>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.implicit_outputs = collect_paths(outputs);
        self
    }

    /// Bind a variable for this statement.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Explicit then implicit outputs.
    pub fn all_outputs(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.outputs.iter().chain(&self.implicit_outputs)
    }

    /// Explicit then implicit inputs.
    pub fn all_inputs(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.inputs.iter().chain(&self.implicit_inputs)
    }
}

fn collect_paths<I, P>(paths: I) -> Vec<Utf8PathBuf>
where
    I: IntoIterator<Item = P>,
    P: Into<Utf8PathBuf>,
{
    paths.into_iter().map(Into::into).collect()
}

/// A complete build description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildGraph {
    /// Top-level variables, in declaration order.
    pub variables: IndexMap<String, String>,
    /// Rule definitions, in declaration order.
    pub rules: Vec<Rule>,
    /// Build statements, in emission order.
    pub nodes: Vec<BuildNode>,
    /// Files the graph consumes without producing.
    pub externals: IndexSet<Utf8PathBuf>,
    /// Target built when none is requested.
    pub default_target: Option<Utf8PathBuf>,
}

/// Internal consistency failures of a [`BuildGraph`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two statements claim the same output.
    #[error("output {output} is produced by more than one build statement")]
    DuplicateOutput {
        /// The contested output.
        output: Utf8PathBuf,
    },
    /// An input is neither produced by the graph nor declared external.
    #[error("input {input} of {target} is neither built nor an external file")]
    DanglingInput {
        /// The unresolved input.
        input: Utf8PathBuf,
        /// First output of the statement that consumes it.
        target: Utf8PathBuf,
    },
    /// A statement uses a rule that has no definition.
    #[error("rule {rule} used by {target} is not defined")]
    UndefinedRule {
        /// The missing rule.
        rule: RuleKind,
        /// First output of the statement that uses it.
        target: Utf8PathBuf,
    },
    /// A statement lists one of its own outputs as an input.
    #[error("{target} depends on itself")]
    SelfDependency {
        /// The output that is also an input.
        target: Utf8PathBuf,
    },
    /// A regenerate command argument cannot be written to a shell command
    /// line.
    #[error("argument {arg:?} contains a line break and cannot be quoted")]
    UnquotableArgument {
        /// The offending argument.
        arg: String,
    },
    /// The default target is not produced by any statement.
    #[error("default target {target} is not built by any statement")]
    MissingDefault {
        /// The requested default.
        target: Utf8PathBuf,
    },
}

impl BuildGraph {
    /// Check that every output is produced once and never consumed by its own
    /// statement, every input resolves, every rule used is defined, and the
    /// default target exists.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] found, in node order.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut produced: IndexSet<&Utf8PathBuf> = IndexSet::new();
        for node in &self.nodes {
            for output in node.all_outputs() {
                if !produced.insert(output) {
                    return Err(GraphError::DuplicateOutput {
                        output: output.clone(),
                    });
                }
            }
        }

        for node in &self.nodes {
            let target = node.outputs.first().cloned().unwrap_or_default();
            if node.rule != RuleKind::Phony && !self.rules.iter().any(|r| r.kind == node.rule) {
                return Err(GraphError::UndefinedRule {
                    rule: node.rule,
                    target,
                });
            }
            if let Some(input) = node
                .all_inputs()
                .find(|input| node.all_outputs().any(|output| output == *input))
            {
                return Err(GraphError::SelfDependency {
                    target: input.clone(),
                });
            }
            if let Some(input) = node
                .all_inputs()
                .find(|input| !produced.contains(input) && !self.externals.contains(*input))
            {
                return Err(GraphError::DanglingInput {
                    input: input.clone(),
                    target,
                });
            }
        }

        match &self.default_target {
            Some(target) if !produced.contains(target) => Err(GraphError::MissingDefault {
                target: target.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Find the statement producing `output`.
    #[must_use]
    pub fn node_for(&self, output: &str) -> Option<&BuildNode> {
        self.nodes
            .iter()
            .find(|node| node.all_outputs().any(|o| o.as_str() == output))
    }
}

#[cfg(test)]
mod tests;

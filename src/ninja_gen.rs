//! Ninja file generator.
//!
//! This module converts a [`crate::graph::BuildGraph`] into the textual
//! representation expected by the Ninja build system. Nodes are written in
//! the order the graph lists them, so identical graphs give byte-identical
//! files and diffs between generations stay readable.

use crate::graph::{BuildGraph, BuildNode, Rule};
use camino::Utf8PathBuf;
use itertools::Itertools;
use std::borrow::Cow;
use std::fmt::{self, Display, Formatter, Write};
use thiserror::Error;

/// Banner written at the top of every generated file.
pub const HEADER: &str = "# Auto-generated by enclave-test, do not edit!";

/// Errors raised while rendering a graph.
#[derive(Debug, Error)]
pub enum NinjaGenError {
    /// A path or value contains a line break, which Ninja cannot represent.
    #[error("{value:?} contains a line break and cannot be written to a Ninja file")]
    LineBreak {
        /// The offending text.
        value: String,
    },
    /// Writing to the output buffer failed.
    #[error("failed to format Ninja output")]
    Format(#[from] fmt::Error),
}

/// Generate a Ninja build file as a string.
///
/// # Errors
///
/// Returns [`NinjaGenError::LineBreak`] when a path or variable value cannot
/// be escaped.
///
/// # Examples
/// ```
/// use enclave_test::graph::{BuildGraph, BuildNode, RuleKind};
/// use enclave_test::ninja_gen::generate;
///
/// let mut graph = BuildGraph::default();
/// graph.nodes.push(BuildNode::new(RuleKind::Phony, ["all"]).with_inputs(["a b"]));
/// let ninja = generate(&graph).unwrap();
/// assert!(ninja.contains("build all: phony a$ b\n"));
/// ```
pub fn generate(graph: &BuildGraph) -> Result<String, NinjaGenError> {
    let mut out = String::new();
    writeln!(out, "{HEADER}")?;
    writeln!(out)?;

    if !graph.variables.is_empty() {
        for (key, value) in &graph.variables {
            writeln!(out, "{key} = {}", escape_value(value)?)?;
        }
        writeln!(out)?;
    }

    for rule in &graph.rules {
        write!(out, "{}", DisplayRule(rule))?;
    }

    for node in &graph.nodes {
        write!(out, "{}", DisplayNode::new(node)?)?;
        if let Some(default) = &graph.default_target {
            if node.outputs.contains(default) {
                writeln!(out, "default {}", escape_path(default.as_str())?)?;
            }
        }
        writeln!(out)?;
    }

    Ok(out)
}

/// Escape a path for use in a `build` line.
///
/// `$`, spaces, and colons carry meaning in build lines and are prefixed
/// with `$`.
fn escape_path(path: &str) -> Result<Cow<'_, str>, NinjaGenError> {
    reject_line_breaks(path)?;
    if !path.contains(['$', ' ', ':']) {
        return Ok(Cow::Borrowed(path));
    }
    let mut escaped = String::with_capacity(path.len() + 4);
    for ch in path.chars() {
        if matches!(ch, '$' | ' ' | ':') {
            escaped.push('$');
        }
        escaped.push(ch);
    }
    Ok(Cow::Owned(escaped))
}

/// Escape a variable value.
///
/// `$` is doubled. Ninja drops whitespace before a value, so leading spaces
/// are written as `$ `.
fn escape_value(value: &str) -> Result<Cow<'_, str>, NinjaGenError> {
    reject_line_breaks(value)?;
    if !value.contains('$') && !value.starts_with(' ') {
        return Ok(Cow::Borrowed(value));
    }
    let body = value.trim_start_matches(' ');
    let leading = value.len() - body.len();
    Ok(Cow::Owned(format!(
        "{}{}",
        "$ ".repeat(leading),
        body.replace('$', "$$")
    )))
}

fn reject_line_breaks(value: &str) -> Result<(), NinjaGenError> {
    if value.contains(['\n', '\r']) {
        Err(NinjaGenError::LineBreak {
            value: value.to_owned(),
        })
    } else {
        Ok(())
    }
}

fn join(paths: &[Utf8PathBuf]) -> Result<String, NinjaGenError> {
    let escaped: Vec<Cow<'_, str>> = paths
        .iter()
        .map(|p| escape_path(p.as_str()))
        .collect::<Result<_, _>>()?;
    Ok(escaped.iter().join(" "))
}

/// Wrapper struct to display a rule definition.
struct DisplayRule<'a>(&'a Rule);

impl Display for DisplayRule<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rule = self.0;
        writeln!(f, "rule {}", rule.kind)?;
        writeln!(f, "  command = {}", rule.command)?;
        writeln!(f, "  description = {}", rule.description)?;
        if let Some(depfile) = &rule.depfile {
            writeln!(f, "  depfile = {depfile}")?;
        }
        if rule.generator {
            writeln!(f, "  generator = 1")?;
        }
        writeln!(f)
    }
}

/// A build statement with every path already escaped.
struct DisplayNode<'a> {
    node: &'a BuildNode,
    outputs: String,
    implicit_outputs: String,
    inputs: String,
    implicit_inputs: String,
    variables: Vec<(&'a str, Cow<'a, str>)>,
}

impl<'a> DisplayNode<'a> {
    fn new(node: &'a BuildNode) -> Result<Self, NinjaGenError> {
        let variables = node
            .variables
            .iter()
            .map(|(key, value)| escape_value(value).map(|escaped| (key.as_str(), escaped)))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            node,
            outputs: join(&node.outputs)?,
            implicit_outputs: join(&node.implicit_outputs)?,
            inputs: join(&node.inputs)?,
            implicit_inputs: join(&node.implicit_inputs)?,
            variables,
        })
    }
}

impl Display for DisplayNode<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "build {}", self.outputs)?;
        if !self.implicit_outputs.is_empty() {
            write!(f, " | {}", self.implicit_outputs)?;
        }
        write!(f, ": {}", self.node.rule)?;
        if !self.inputs.is_empty() {
            write!(f, " {}", self.inputs)?;
        }
        if !self.implicit_inputs.is_empty() {
            write!(f, " | {}", self.implicit_inputs)?;
        }
        writeln!(f)?;
        for (key, value) in &self.variables {
            writeln!(f, "  {key} = {value}")?;
        }
        Ok(())
    }
}

//! Unit tests for graph construction and validation.

use super::*;
use crate::config::{HostContext, TestConfig};
use crate::template::{KnownTemplates, MockTemplateResolver};
use anyhow::{Context, Result, ensure};
use camino::Utf8Path;
use rstest::{fixture, rstest};
use std::collections::BTreeSet;

const SCENARIO: &str = concat!(
    "manifests = [\"a\", \"b\"]\n",
    "no_binary = [\"b\"]\n",
    "binary_install_dir = \"bin\"\n",
    "[sgx]\n",
    "manifests = [\"c\"]\n",
);

#[fixture]
fn settings() -> GeneratorSettings {
    GeneratorSettings::new(vec!["regen".to_owned()])
}

fn config(source: &str) -> Result<TestConfig> {
    let host = HostContext::for_arch("x86_64")
        .with_pkglib_root("/pkg")
        .with_key("/keys/k.pem");
    Ok(TestConfig::from_toml(
        source,
        Utf8Path::new("tests.toml"),
        &host,
    )?)
}

fn graph_for(source: &str, settings: &GeneratorSettings) -> Result<BuildGraph> {
    let config = config(source)?;
    Ok(build_graph(&config, &KnownTemplates::default(), settings)?)
}

fn inputs_of<'g>(graph: &'g BuildGraph, output: &str) -> Result<Vec<&'g str>> {
    let node = graph
        .node_for(output)
        .with_context(|| format!("no node builds {output}"))?;
    Ok(node.inputs.iter().map(|p| p.as_str()).collect())
}

#[rstest]
fn direct_aggregate_matches_scenario(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for(SCENARIO, &settings)?;
    assert_eq!(inputs_of(&graph, "direct")?, ["a", "a.manifest", "b.manifest"]);
    assert_eq!(graph.default_target.as_deref(), Some(Utf8Path::new("direct")));
    Ok(())
}

#[rstest]
fn sgx_aggregate_matches_scenario(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for(SCENARIO, &settings)?;
    let expected = [
        "a",
        "c",
        "a.manifest",
        "b.manifest",
        "c.manifest",
        "a.manifest.sgx",
        "b.manifest.sgx",
        "c.manifest.sgx",
        "a.sig",
        "b.sig",
        "c.sig",
        "a.token",
        "b.token",
        "c.token",
    ];
    assert_eq!(inputs_of(&graph, "sgx")?, expected);
    Ok(())
}

#[rstest]
fn excluded_names_get_no_symlink(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for(SCENARIO, &settings)?;
    let symlinks: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|node| node.rule == RuleKind::Symlink)
        .flat_map(|node| node.outputs.iter().map(|p| p.as_str()))
        .collect();
    assert_eq!(symlinks, ["a", "c"]);
    let a = graph.node_for("a").context("symlink for a")?;
    assert_eq!(a.inputs, [Utf8PathBuf::from("/pkg/bin/a")]);
    Ok(())
}

#[rstest]
#[case::no_exclusions("manifests = [\"a\", \"b\"]\n")]
#[case::with_exclusions("manifests = [\"a\", \"b\"]\nno_binary = [\"a\"]\n")]
fn no_binary_dir_means_no_symlinks(settings: GeneratorSettings, #[case] source: &str) -> Result<()> {
    let graph = graph_for(source, &settings)?;
    ensure!(
        graph.nodes.iter().all(|node| node.rule != RuleKind::Symlink),
        "no symlink nodes expected without binary_install_dir"
    );
    Ok(())
}

#[rstest]
fn in_tree_binaries_are_external_without_binary_dir(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for("manifests = [\"a\"]\n", &settings)?;
    ensure!(
        graph.externals.contains(Utf8Path::new("a")),
        "bare binary should be an external input"
    );
    Ok(())
}

#[rstest]
fn sign_node_depends_on_key_and_every_binary_once(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for(SCENARIO, &settings)?;
    for name in ["a", "b", "c"] {
        let node = graph
            .node_for(&format!("{name}.manifest.sgx"))
            .with_context(|| format!("sign node for {name}"))?;
        assert_eq!(node.rule, RuleKind::SgxSign);
        assert_eq!(node.inputs, [Utf8PathBuf::from(format!("{name}.manifest"))]);
        assert_eq!(node.implicit_outputs, [Utf8PathBuf::from(format!("{name}.sig"))]);
        let implicit: Vec<&str> = node.implicit_inputs.iter().map(|p| p.as_str()).collect();
        assert_eq!(implicit, ["/keys/k.pem", "a", "c"]);
    }
    Ok(())
}

#[rstest]
fn token_and_aliases_follow_the_signature(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for(SCENARIO, &settings)?;
    assert_eq!(inputs_of(&graph, "c.token")?, ["c.sig"]);
    assert_eq!(inputs_of(&graph, "direct-c")?, ["c.manifest"]);
    assert_eq!(
        inputs_of(&graph, "sgx-c")?,
        ["c.manifest", "c.manifest.sgx", "c.sig", "c.token"]
    );
    Ok(())
}

#[rstest]
fn manifest_node_binds_entrypoint(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for(SCENARIO, &settings)?;
    let node = graph.node_for("b.manifest").context("manifest node for b")?;
    assert_eq!(node.rule, RuleKind::Manifest);
    assert_eq!(node.variables.get("ENTRYPOINT").map(String::as_str), Some("b"));
    Ok(())
}

#[rstest]
fn own_template_is_preferred(settings: GeneratorSettings) -> Result<()> {
    let config = config("manifests = [\"a\", \"b\"]\n")?;
    let mut resolver = MockTemplateResolver::new();
    resolver
        .expect_template_exists()
        .returning(|path| path.as_str() == "a.manifest.template");
    let graph = GraphBuilder::new(&config, &resolver, &settings).build()?;
    assert_eq!(inputs_of(&graph, "a.manifest")?, ["a.manifest.template"]);
    assert_eq!(inputs_of(&graph, "b.manifest")?, ["manifest.template"]);
    Ok(())
}

#[rstest]
fn templates_are_resolved_once_per_name(settings: GeneratorSettings) -> Result<()> {
    let config = config("manifests = [\"a\", \"a\"]\n[sgx]\nmanifests = [\"a\"]\n")?;
    let mut resolver = MockTemplateResolver::new();
    resolver
        .expect_template_exists()
        .times(1)
        .return_const(false);
    GraphBuilder::new(&config, &resolver, &settings).build()?;
    Ok(())
}

#[rstest]
fn duplicate_names_produce_one_node_set(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for("manifests = [\"a\"]\n[sgx]\nmanifests = [\"a\"]\n", &settings)?;
    let manifests = graph
        .nodes
        .iter()
        .filter(|node| node.rule == RuleKind::Manifest)
        .count();
    assert_eq!(manifests, 1);
    assert_eq!(
        inputs_of(&graph, "sgx")?,
        ["a", "a.manifest", "a.manifest.sgx", "a.sig", "a.token"]
    );
    Ok(())
}

#[rstest]
fn regeneration_node_reads_only_the_config(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for(SCENARIO, &settings)?;
    let node = graph.node_for("build.ninja").context("regeneration node")?;
    assert_eq!(node.rule, RuleKind::Regenerate);
    assert_eq!(node.inputs, [Utf8PathBuf::from("tests.toml")]);
    ensure!(node.implicit_inputs.is_empty(), "no implicit inputs expected");
    for aggregate in ["direct", "sgx"] {
        ensure!(
            !inputs_of(&graph, aggregate)?.contains(&"build.ninja"),
            "{aggregate} must not depend on the build file"
        );
    }
    let rule = graph
        .rules
        .iter()
        .find(|rule| rule.kind == RuleKind::Regenerate)
        .context("regenerate rule")?;
    ensure!(rule.generator, "regenerate rule must be a generator");
    Ok(())
}

#[rstest]
fn regenerate_command_is_escaped_for_ninja() -> Result<()> {
    let settings = GeneratorSettings::new(vec!["regen".to_owned(), "$HOME".to_owned()]);
    let graph = graph_for("", &settings)?;
    let rule = graph
        .rules
        .iter()
        .find(|rule| rule.kind == RuleKind::Regenerate)
        .context("regenerate rule")?;
    ensure!(rule.command.starts_with("regen "), "got {}", rule.command);
    ensure!(rule.command.contains("$$HOME"), "got {}", rule.command);
    Ok(())
}

#[rstest]
#[case::line_feed("/pkg\n/evil")]
#[case::carriage_return("/pkg\r")]
fn regenerate_arguments_with_line_breaks_are_rejected(#[case] arg: &str) -> Result<()> {
    let settings = GeneratorSettings::new(vec!["regen".to_owned(), arg.to_owned()]);
    let err = graph_for("manifests = [\"a\"]\n", &settings)
        .err()
        .context("line break in the regenerate command should fail")?;
    assert_eq!(
        err.downcast_ref::<GraphError>(),
        Some(&GraphError::UnquotableArgument {
            arg: arg.to_owned()
        })
    );
    Ok(())
}

#[rstest]
fn build_is_deterministic(settings: GeneratorSettings) -> Result<()> {
    let first = graph_for(SCENARIO, &settings)?;
    let second = graph_for(SCENARIO, &settings)?;
    assert_eq!(first, second);
    Ok(())
}

/// Non-phony outputs reachable from `target`.
fn closure(graph: &BuildGraph, target: &str) -> BTreeSet<String> {
    let mut built = BTreeSet::new();
    let mut pending = vec![target.to_owned()];
    let mut seen = BTreeSet::new();
    while let Some(current) = pending.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let Some(node) = graph.node_for(&current) else {
            continue;
        };
        if node.rule != RuleKind::Phony {
            built.extend(node.all_outputs().map(ToString::to_string));
        }
        pending.extend(node.all_inputs().map(ToString::to_string));
    }
    built
}

#[rstest]
fn direct_closure_builds_plain_manifests_and_symlinks(settings: GeneratorSettings) -> Result<()> {
    let graph = graph_for(SCENARIO, &settings)?;
    let built = closure(&graph, "direct");
    let expected: BTreeSet<String> = ["a", "a.manifest", "b.manifest"]
        .map(ToOwned::to_owned)
        .into_iter()
        .collect();
    assert_eq!(built, expected);
    Ok(())
}

#[rstest]
fn validate_rejects_duplicate_outputs() {
    let mut graph = BuildGraph::default();
    graph.nodes.push(BuildNode::new(RuleKind::Phony, ["x"]));
    graph
        .nodes
        .push(BuildNode::new(RuleKind::Phony, ["y"]).with_implicit_outputs(["x"]));
    assert_eq!(
        graph.validate(),
        Err(GraphError::DuplicateOutput {
            output: Utf8PathBuf::from("x")
        })
    );
}

#[rstest]
#[case::explicit(BuildNode::new(RuleKind::Phony, ["x"]).with_inputs(["x"]))]
#[case::implicit_output(
    BuildNode::new(RuleKind::Phony, ["x"])
        .with_implicit_outputs(["y"])
        .with_implicit_inputs(["y"])
)]
fn validate_rejects_self_dependencies(#[case] node: BuildNode) {
    let target = node
        .all_inputs()
        .next()
        .cloned()
        .unwrap_or_default();
    let mut graph = BuildGraph::default();
    graph.nodes.push(node);
    assert_eq!(graph.validate(), Err(GraphError::SelfDependency { target }));
}

#[rstest]
fn validate_rejects_dangling_inputs() {
    let mut graph = BuildGraph::default();
    graph
        .nodes
        .push(BuildNode::new(RuleKind::Phony, ["x"]).with_implicit_inputs(["missing"]));
    assert_eq!(
        graph.validate(),
        Err(GraphError::DanglingInput {
            input: Utf8PathBuf::from("missing"),
            target: Utf8PathBuf::from("x"),
        })
    );
}

#[rstest]
fn validate_rejects_undefined_rules() {
    let mut graph = BuildGraph::default();
    graph.nodes.push(BuildNode::new(RuleKind::Manifest, ["x"]));
    assert_eq!(
        graph.validate(),
        Err(GraphError::UndefinedRule {
            rule: RuleKind::Manifest,
            target: Utf8PathBuf::from("x"),
        })
    );
}

#[rstest]
fn validate_rejects_missing_default() {
    let graph = BuildGraph {
        default_target: Some(Utf8PathBuf::from("all")),
        ..BuildGraph::default()
    };
    assert_eq!(
        graph.validate(),
        Err(GraphError::MissingDefault {
            target: Utf8PathBuf::from("all")
        })
    );
}

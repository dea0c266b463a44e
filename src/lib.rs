//! enclave-test core library.
//!
//! Turns a test directory's `tests.toml` into a Ninja build file that renders,
//! signs and fetches launch tokens for SGX enclave manifests, then drives
//! Ninja and pytest over it. The pipeline is:
//!
//! 1. [`config`] loads and validates the configuration,
//! 2. [`graph`] expands it into a build graph,
//! 3. [`ninja_gen`] renders the graph as Ninja syntax,
//! 4. [`runner`] writes the file and launches the tools.

pub mod cli;
pub mod config;
pub mod graph;
pub mod ninja_gen;
pub mod runner;
pub mod template;

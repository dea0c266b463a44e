//! Build script that generates the man page from the CLI definition.

use clap::CommandFactory;
use clap_mangen::Man;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

#[path = "src/cli.rs"]
#[expect(
    dead_code,
    reason = "Only type definitions are needed for man page generation"
)]
mod cli;

fn render(man: &Man, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    fs::write(path, buf)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-env-changed=CARGO_PKG_VERSION");
    println!("cargo:rerun-if-env-changed=CARGO_BIN_NAME");

    let out_dir = PathBuf::from("target/generated-man");
    if out_dir.exists() {
        fs::remove_dir_all(&out_dir)?;
    }
    fs::create_dir_all(&out_dir)?;

    let cmd = cli::Cli::command();
    let name = cmd.get_name().to_owned();
    let cargo_bin = env::var("CARGO_BIN_NAME")
        .or_else(|_| env::var("CARGO_PKG_NAME"))
        .unwrap_or_else(|_| name.clone());
    if name != cargo_bin {
        return Err(format!(
            "CLI name '{name}' differs from Cargo bin/package name '{cargo_bin}'; packaging expects {cargo_bin}.1"
        )
        .into());
    }

    // One page per subcommand, named the way `man enclave-test-pytest` expects.
    for sub in cmd.get_subcommands() {
        let page = format!("{name}-{}", sub.get_name());
        let man = Man::new(sub.clone()).title(page.clone());
        render(&man, &out_dir.join(format!("{page}.1")))?;
    }
    render(&Man::new(cmd), &out_dir.join(format!("{name}.1")))?;
    Ok(())
}

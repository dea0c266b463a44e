//! Integration tests for CLI execution using `assert_cmd`.
//!
//! These tests invoke the compiled binary against a temporary test
//! directory, with fake `ninja` and `python3` executables standing in for
//! the real tools.

use anyhow::{Context, Result, ensure};
use assert_cmd::Command;
use camino::Utf8Path;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use test_support::{FakeTool, fake_ninja, fake_python, test_dir};

const CONFIG: &str = "manifests = [\"hello\"]\n[sgx]\nmanifests = [\"attest\"]\n";

/// The binary configured to run in `dir` with the given fake tools.
fn enclave_test(dir: &Utf8Path, ninja: &FakeTool, python: &FakeTool) -> Result<Command> {
    let mut cmd = Command::cargo_bin("enclave-test").context("locate enclave-test binary")?;
    cmd.current_dir(dir)
        .env("ENCLAVE_TEST_NINJA", ninja.path())
        .env("ENCLAVE_TEST_PYTHON", python.path())
        .env("HOME", dir)
        .env_remove("SGX")
        .env_remove("ENCLAVE_TEST_KEY")
        .env_remove("ENCLAVE_TEST_PKGLIBDIR");
    Ok(cmd)
}

fn tools(ninja_exit: i32, python_exit: i32) -> Result<(FakeTool, FakeTool)> {
    Ok((fake_ninja(ninja_exit)?, fake_python(python_exit)?))
}

#[test]
fn manifest_streams_to_stdout_when_dash() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    enclave_test(&dir, &ninja, &python)?
        .args(["manifest", "-"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("# Auto-generated by enclave-test"))
        .stdout(predicate::str::contains("build sgx-attest: phony"));
    ensure!(!dir.join("-").exists(), "manifest - must not create a file");
    ensure!(!dir.join("build.ninja").exists(), "manifest - must not write build.ninja");
    ensure!(ninja.invocations()?.is_empty(), "manifest must not run ninja");
    Ok(())
}

#[test]
fn manifest_writes_relative_to_directory() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    let elsewhere = tempfile::tempdir().context("create cwd")?;
    enclave_test(&dir, &ninja, &python)?
        .current_dir(elsewhere.path())
        .arg("-C")
        .arg(dir.as_str())
        .args(["manifest", "out/standalone.ninja"])
        .assert()
        .success();
    let written = fs::read_to_string(dir.join("out/standalone.ninja"))?;
    ensure!(written.contains("build hello.manifest"), "unexpected:\n{written}");
    Ok(())
}

#[test]
fn generate_writes_once_unless_forced() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    let build_file = dir.join("build.ninja");

    enclave_test(&dir, &ninja, &python)?.arg("generate").assert().success();
    let first = fs::read_to_string(&build_file)?;
    ensure!(first.contains("generator = 1"), "unexpected:\n{first}");

    fs::write(&build_file, "# edited\n")?;
    enclave_test(&dir, &ninja, &python)?.arg("generate").assert().success();
    ensure!(fs::read_to_string(&build_file)? == "# edited\n", "file was rewritten");

    enclave_test(&dir, &ninja, &python)?
        .args(["generate", "--force"])
        .assert()
        .success();
    ensure!(fs::read_to_string(&build_file)? == first, "forced generation differs");
    Ok(())
}

#[rstest]
#[case::default_mode(&[], &[], "SGX=unset -f build.ninja direct")]
#[case::flag(&["--sgx"], &[], "SGX=unset -f build.ninja sgx")]
#[case::env(&[], &[("SGX", "1")], "SGX=1 -f build.ninja sgx")]
#[case::env_off(&[], &[("SGX", "0")], "SGX=0 -f build.ninja direct")]
#[case::jobs(&["-j", "3"], &[], "SGX=unset -f build.ninja -j 3 direct")]
fn build_invokes_ninja_for_the_mode(
    #[case] global: &[&str],
    #[case] env: &[(&str, &str)],
    #[case] expected: &str,
) -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    let mut cmd = enclave_test(&dir, &ninja, &python)?;
    cmd.args(global).arg("build");
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.assert().success();
    ensure!(ninja.invocations()? == [expected], "got {:?}", ninja.invocations()?);
    ensure!(dir.join("build.ninja").is_file(), "build must generate the file first");
    Ok(())
}

#[test]
fn bare_invocation_builds() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    enclave_test(&dir, &ninja, &python)?.assert().success();
    ensure!(
        ninja.invocations()? == ["SGX=unset -f build.ninja direct"],
        "got {:?}",
        ninja.invocations()?
    );
    Ok(())
}

#[test]
fn build_passes_explicit_targets() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    enclave_test(&dir, &ninja, &python)?
        .args(["build", "sgx-attest", "direct-hello"])
        .assert()
        .success();
    ensure!(
        ninja.invocations()? == ["SGX=unset -f build.ninja sgx-attest direct-hello"],
        "got {:?}",
        ninja.invocations()?
    );
    Ok(())
}

#[test]
fn ninja_exit_status_is_propagated() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(3, 0)?;
    enclave_test(&dir, &ninja, &python)?
        .arg("build")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("exited with status 3"));
    Ok(())
}

#[rstest]
#[case::direct(&[], "SGX= -m pytest -x tests/test_basic.py")]
#[case::sgx(&["--sgx"], "SGX=1 -m pytest -x tests/test_basic.py")]
fn pytest_builds_then_runs_tests(#[case] global: &[&str], #[case] expected: &str) -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    enclave_test(&dir, &ninja, &python)?
        .args(global)
        .args(["pytest", "-x", "tests/test_basic.py"])
        .assert()
        .success();
    ensure!(ninja.invocations()?.len() == 1, "ninja should run once");
    ensure!(python.invocations()? == [expected], "got {:?}", python.invocations()?);
    Ok(())
}

#[test]
fn pytest_exit_status_is_propagated() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 5)?;
    enclave_test(&dir, &ninja, &python)?
        .arg("pytest")
        .assert()
        .code(5);
    Ok(())
}

#[test]
fn pytest_is_skipped_when_the_build_fails() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(2, 0)?;
    enclave_test(&dir, &ninja, &python)?
        .arg("pytest")
        .assert()
        .code(2);
    ensure!(python.invocations()?.is_empty(), "pytest must not run");
    Ok(())
}

#[test]
fn clean_runs_the_ninja_tool() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    enclave_test(&dir, &ninja, &python)?.arg("clean").assert().success();
    ensure!(
        ninja.invocations()? == ["SGX=unset -f build.ninja -t clean"],
        "got {:?}",
        ninja.invocations()?
    );
    Ok(())
}

#[test]
fn missing_configuration_fails_cleanly() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    fs::remove_file(dir.join("tests.toml"))?;
    let (ninja, python) = tools(0, 0)?;
    enclave_test(&dir, &ninja, &python)?
        .arg("build")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("tests.toml"));
    ensure!(ninja.invocations()?.is_empty(), "ninja must not run");
    Ok(())
}

#[test]
fn invalid_configuration_keeps_the_previous_build_file() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    let build_file = dir.join("build.ninja");
    enclave_test(&dir, &ninja, &python)?.arg("generate").assert().success();
    let before = fs::read_to_string(&build_file)?;

    fs::write(dir.join("tests.toml"), "manifests = \"hello\"\n")?;
    enclave_test(&dir, &ninja, &python)?
        .args(["generate", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("enclave_test::config::parse"));
    ensure!(fs::read_to_string(&build_file)? == before, "build file was replaced");
    Ok(())
}

#[test]
fn clashing_name_fails_before_ninja_runs() -> Result<()> {
    let (_guard, dir) = test_dir("manifests = [\"direct\"]\n")?;
    let (ninja, python) = tools(0, 0)?;
    enclave_test(&dir, &ninja, &python)?
        .arg("build")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("enclave_test::config::invalid_name"));
    ensure!(ninja.invocations()?.is_empty(), "ninja must not run");
    ensure!(!dir.join("build.ninja").exists(), "no build file may be written");
    Ok(())
}

#[test]
fn missing_ninja_is_reported() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    enclave_test(&dir, &ninja, &python)?
        .env("ENCLAVE_TEST_NINJA", dir.join("no-such-ninja"))
        .arg("build")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to start"));
    Ok(())
}

#[test]
fn regenerate_rule_calls_back_into_this_binary() -> Result<()> {
    let (_guard, dir) = test_dir(CONFIG)?;
    let (ninja, python) = tools(0, 0)?;
    let output = enclave_test(&dir, &ninja, &python)?
        .args(["--key", "/keys/k.pem", "--pkglibdir", "/pkg", "manifest", "-"])
        .output()?;
    ensure!(output.status.success(), "manifest failed");
    let text = String::from_utf8(output.stdout)?;
    let command = text
        .lines()
        .skip_while(|line| *line != "rule regenerate")
        .nth(1)
        .unwrap_or_default();
    ensure!(
        command.contains("enclave-test --config tests.toml --key /keys/k.pem --pkglibdir /pkg"),
        "got {command:?}"
    );
    ensure!(command.ends_with(" generate --force"), "got {command:?}");
    Ok(())
}

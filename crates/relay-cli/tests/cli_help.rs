use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("relay")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("models"))
        .stdout(predicate::str::contains("balance"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_chat_help_shows_options() {
    cargo_bin_cmd!("relay")
        .args(["chat", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--provider"))
        .stdout(predicate::str::contains("--model"))
        .stdout(predicate::str::contains("--prompt"))
        .stdout(predicate::str::contains("--thinking-budget"));
}

#[test]
fn test_chat_requires_prompt() {
    cargo_bin_cmd!("relay")
        .args(["chat", "--provider", "openai", "--model", "gpt-4o"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--prompt"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("relay")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1"));
}

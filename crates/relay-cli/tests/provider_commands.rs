//! Integration tests for commands that talk to a provider.

mod fixtures;

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use fixtures::{can_bind_localhost, text_response, write_openai_config};
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_models_lists_provider_models() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"id": "gpt-4o"}, {"id": "gpt-4o-mini"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    write_openai_config(home.path(), "openai", &server.uri(), "");

    cargo_bin_cmd!("relay")
        .env("RELAY_HOME", home.path())
        .args(["models", "openai"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gpt-4o\n"))
        .stdout(predicate::str::contains("gpt-4o-mini"));
}

#[tokio::test]
async fn test_balance_reads_configured_path() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "balance_infos": [{"currency": "CNY", "total_balance": "110.005"}]
        })))
        .mount(&server)
        .await;
    write_openai_config(
        home.path(),
        "deepseek",
        &server.uri(),
        "\n[providers.balance]\nenabled = true\napi_path = \"/user/balance\"\nresult_path = \"balance_infos[0].total_balance\"\n",
    );

    cargo_bin_cmd!("relay")
        .env("RELAY_HOME", home.path())
        .args(["balance", "deepseek"])
        .assert()
        .success()
        .stdout(predicate::str::diff("110.01\n"));
}

#[tokio::test]
async fn test_balance_disabled_is_an_error() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    write_openai_config(home.path(), "openai", &server.uri(), "");

    cargo_bin_cmd!("relay")
        .env("RELAY_HOME", home.path())
        .args(["balance", "openai"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("get balance for 'openai'"));
}

#[tokio::test]
async fn test_chat_streams_answer() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "stream": true,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Say hello"}
            ]
        })))
        .respond_with(text_response(&["Hello", ", world"]))
        .expect(1)
        .mount(&server)
        .await;
    write_openai_config(home.path(), "openai", &server.uri(), "");

    cargo_bin_cmd!("relay")
        .env("RELAY_HOME", home.path())
        .args([
            "chat",
            "--provider",
            "openai",
            "--model",
            "gpt-test",
            "--system",
            "Be brief.",
            "-p",
            "Say hello",
        ])
        .assert()
        .success()
        .stdout(predicate::str::diff("Hello, world\n"));

    assert!(home.path().join("key_cursors.json").exists());
}

#[tokio::test]
async fn test_chat_inlines_attached_file() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let notes = home.path().join("notes.txt");
    fs::write(&notes, "remember the milk").unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(wiremock::matchers::body_string_contains("remember the milk"))
        .respond_with(text_response(&["Noted."]))
        .expect(1)
        .mount(&server)
        .await;
    write_openai_config(home.path(), "openai", &server.uri(), "");

    cargo_bin_cmd!("relay")
        .env("RELAY_HOME", home.path())
        .args(["chat", "--provider", "openai", "--model", "gpt-test", "-p", "Summarize"])
        .arg("--file")
        .arg(&notes)
        .assert()
        .success()
        .stdout(predicate::str::contains("Noted."));
}

#[tokio::test]
async fn test_chat_think_tags_prints_answer_only() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(text_response(&["<think>plan", " it</think>", "Answer"]))
        .mount(&server)
        .await;
    write_openai_config(home.path(), "openai", &server.uri(), "");

    cargo_bin_cmd!("relay")
        .env("RELAY_HOME", home.path())
        .args([
            "chat",
            "--provider",
            "openai",
            "--model",
            "gpt-test",
            "--think-tags",
            "-p",
            "Question",
        ])
        .assert()
        .success()
        .stdout(predicate::str::diff("Answer\n"));
}

#[tokio::test]
async fn test_chat_reports_provider_error() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .mount(&server)
        .await;
    write_openai_config(home.path(), "openai", &server.uri(), "");

    cargo_bin_cmd!("relay")
        .env("RELAY_HOME", home.path())
        .args(["chat", "--provider", "openai", "--model", "gpt-test", "-p", "Hi"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("HTTP 429: Rate limit reached"));
}

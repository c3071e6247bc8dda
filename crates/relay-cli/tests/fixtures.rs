//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use wiremock::ResponseTemplate;

pub fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Writes a config with one OpenAI-compatible provider pointing at `base_url`.
pub fn write_openai_config(home: &Path, id: &str, base_url: &str, extra: &str) {
    let config = format!(
        r#"[[providers]]
type = "openai"
id = "{id}"
api_keys = ["test-key"]
base_url = "{base_url}"
{extra}
"#
    );
    fs::write(home.join("config.toml"), config).unwrap();
}

/// One `data:` line per event, ending with `[DONE]`.
pub fn sse_response(events: &[&str]) -> ResponseTemplate {
    let mut body: String = events
        .iter()
        .map(|data| format!("data: {data}\n\n"))
        .collect();
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

/// Chat Completions stream that answers with `pieces` in order.
pub fn text_response(pieces: &[&str]) -> ResponseTemplate {
    let mut events: Vec<String> = pieces
        .iter()
        .map(|piece| {
            serde_json::json!({
                "id": "chatcmpl-1",
                "model": "gpt-test",
                "choices": [{"index": 0, "delta": {"content": piece}}]
            })
            .to_string()
        })
        .collect();
    events.push(
        serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-test",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        })
        .to_string(),
    );
    let refs: Vec<&str> = events.iter().map(String::as_str).collect();
    sse_response(&refs)
}

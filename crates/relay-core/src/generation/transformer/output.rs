use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::OutputTransformer;
use crate::message::{ReasoningMetadata, UIMessage, UIMessagePart};

const THINK_START: &str = "<think>";
const THINK_END: &str = "</think>";

/// Moves `<think>...</think>` spans out of text into Reasoning parts.
///
/// For models that inline their reasoning in the answer text. An unclosed
/// `<think>` turns the rest of that text into reasoning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThinkTagTransformer;

impl ThinkTagTransformer {
    fn split(message: &mut UIMessage) {
        let now = Utc::now();
        let mut parts = Vec::with_capacity(message.parts.len());
        for part in message.parts.drain(..) {
            match part {
                UIMessagePart::Text { text } if text.contains(THINK_START) => {
                    let mut rest = text.as_str();
                    while let Some(start) = rest.find(THINK_START) {
                        push_text(&mut parts, &rest[..start]);
                        let inner = &rest[start + THINK_START.len()..];
                        let (reasoning, after) = match inner.find(THINK_END) {
                            Some(end) => (&inner[..end], &inner[end + THINK_END.len()..]),
                            None => (inner, ""),
                        };
                        parts.push(UIMessagePart::Reasoning {
                            reasoning: reasoning.trim().to_string(),
                            metadata: ReasoningMetadata::default(),
                            created_at: Some(now),
                            finished_at: Some(now),
                        });
                        rest = after.trim_start();
                    }
                    push_text(&mut parts, rest);
                }
                other => parts.push(other),
            }
        }
        message.parts = parts;
    }
}

fn push_text(parts: &mut Vec<UIMessagePart>, text: &str) {
    if !text.trim().is_empty() {
        parts.push(UIMessagePart::text(text));
    }
}

impl OutputTransformer for ThinkTagTransformer {
    fn name(&self) -> &str {
        "think_tag"
    }

    fn transform<'a>(&'a self, message: &'a mut UIMessage) -> BoxFuture<'a, anyhow::Result<()>> {
        Self::split(message);
        futures_util::future::ready(Ok(())).boxed()
    }
}

/// Regex replacement over assistant text parts.
#[derive(Debug, Clone)]
pub struct RegexTransformer {
    pattern: Regex,
    replacement: String,
}

impl RegexTransformer {
    /// # Errors
    /// Returns an error if `pattern` is not a valid regex.
    pub fn new(pattern: &str, replacement: impl Into<String>) -> anyhow::Result<Self> {
        let pattern = Regex::new(pattern).with_context(|| format!("invalid pattern {pattern}"))?;
        Ok(Self {
            pattern,
            replacement: replacement.into(),
        })
    }
}

impl OutputTransformer for RegexTransformer {
    fn name(&self) -> &str {
        "regex"
    }

    fn transform<'a>(&'a self, message: &'a mut UIMessage) -> BoxFuture<'a, anyhow::Result<()>> {
        for part in &mut message.parts {
            if let UIMessagePart::Text { text } = part {
                if self.pattern.is_match(text) {
                    *text = self
                        .pattern
                        .replace_all(text, self.replacement.as_str())
                        .into_owned();
                }
            }
        }
        futures_util::future::ready(Ok(())).boxed()
    }
}

/// Writes `data:` image parts to `dir` and points them at the saved file.
///
/// Files are named by the SHA-256 of their bytes, so saving the same image
/// twice reuses one file.
#[derive(Debug, Clone)]
pub struct Base64ImageSaver {
    dir: PathBuf,
}

impl Base64ImageSaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn save(&self, data_url: &str) -> anyhow::Result<String> {
        let rest = data_url
            .strip_prefix("data:")
            .context("not a data URL")?;
        let (meta, data) = rest
            .split_once(',')
            .context("data URL is missing its payload")?;
        let Some(mime) = meta.strip_suffix(";base64") else {
            bail!("data URL is not base64");
        };
        let bytes = BASE64.decode(data).context("invalid base64 payload")?;

        let hash = Sha256::digest(&bytes);
        let file_name = format!("{hash:x}.{}", extension_for(mime));
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;
        let path = std::path::absolute(self.dir.join(file_name))?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        file_url(&path)
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn file_url(path: &Path) -> anyhow::Result<String> {
    url::Url::from_file_path(path)
        .map(String::from)
        .map_err(|()| anyhow::anyhow!("cannot build a file URL for {}", path.display()))
}

impl OutputTransformer for Base64ImageSaver {
    fn name(&self) -> &str {
        "base64_image_saver"
    }

    fn transform<'a>(&'a self, message: &'a mut UIMessage) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            let mut failures = Vec::new();
            for part in &mut message.parts {
                let UIMessagePart::Image { url } = part else {
                    continue;
                };
                if !url.starts_with("data:") {
                    continue;
                }
                match self.save(url).await {
                    Ok(saved) => *url = saved,
                    Err(err) => failures.push(format!("{err:#}")),
                }
            }
            if failures.is_empty() {
                Ok(())
            } else {
                bail!("could not save {} image(s): {}", failures.len(), failures.join("; "))
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn assistant(parts: Vec<UIMessagePart>) -> UIMessage {
        UIMessage::new(Role::Assistant, parts)
    }

    #[tokio::test]
    async fn test_think_tags_become_reasoning() {
        let mut message = assistant(vec![UIMessagePart::text(
            "<think>\nweigh options\n</think>\n\nAnswer: 42",
        )]);
        ThinkTagTransformer.transform(&mut message).await.unwrap();

        assert_eq!(message.parts.len(), 2);
        let UIMessagePart::Reasoning {
            reasoning,
            finished_at,
            ..
        } = &message.parts[0]
        else {
            panic!("expected reasoning");
        };
        assert_eq!(reasoning, "weigh options");
        assert!(finished_at.is_some());
        assert_eq!(message.parts[1], UIMessagePart::text("Answer: 42"));
    }

    #[tokio::test]
    async fn test_unclosed_think_tag_takes_rest() {
        let mut message = assistant(vec![UIMessagePart::text("Intro <think>still going")]);
        ThinkTagTransformer.transform(&mut message).await.unwrap();
        assert_eq!(message.parts[0], UIMessagePart::text("Intro "));
        assert!(matches!(
            &message.parts[1],
            UIMessagePart::Reasoning { reasoning, .. } if reasoning == "still going"
        ));
    }

    #[tokio::test]
    async fn test_regex_rewrites_text_only() {
        let mut message = assistant(vec![
            UIMessagePart::text("call 555-1234 now"),
            UIMessagePart::reasoning_delta("555-1234", ReasoningMetadata::default()),
        ]);
        RegexTransformer::new(r"\d{3}-\d{4}", "[redacted]")
            .unwrap()
            .transform(&mut message)
            .await
            .unwrap();
        assert_eq!(message.text(), "call [redacted] now");
        assert!(matches!(
            &message.parts[1],
            UIMessagePart::Reasoning { reasoning, .. } if reasoning == "555-1234"
        ));
        assert!(RegexTransformer::new("(", "").is_err());
    }

    #[tokio::test]
    async fn test_base64_images_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let png = BASE64.encode(b"\x89PNG\r\n\x1a\nfake");
        let mut message = assistant(vec![
            UIMessagePart::Image {
                url: format!("data:image/png;base64,{png}"),
            },
            UIMessagePart::Image {
                url: "https://example.com/cat.png".to_string(),
            },
        ]);
        Base64ImageSaver::new(dir.path().join("images"))
            .transform(&mut message)
            .await
            .unwrap();

        let UIMessagePart::Image { url } = &message.parts[0] else {
            panic!("expected image");
        };
        assert!(url.starts_with("file://"));
        assert!(url.ends_with(".png"));
        let path = url::Url::parse(url).unwrap().to_file_path().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"\x89PNG\r\n\x1a\nfake");
        assert_eq!(
            message.parts[1],
            UIMessagePart::Image {
                url: "https://example.com/cat.png".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_bad_image_is_kept_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let bad = UIMessagePart::Image {
            url: "data:image/png;base64,@@@".to_string(),
        };
        let mut message = assistant(vec![bad.clone()]);
        let err = Base64ImageSaver::new(dir.path())
            .transform(&mut message)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 image"));
        assert_eq!(message.parts[0], bad);
    }
}

use std::path::PathBuf;

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::InputTransformer;
use crate::message::{Role, UIMessage, UIMessagePart};

/// Where injected text goes relative to the existing system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionPosition {
    Before,
    After,
}

/// Adds fixed text to the system prompt, creating one if needed.
#[derive(Debug, Clone)]
pub struct PromptInjection {
    text: String,
    position: InjectionPosition,
}

impl PromptInjection {
    pub fn prepend(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            position: InjectionPosition::Before,
        }
    }

    pub fn append(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            position: InjectionPosition::After,
        }
    }

    fn inject(&self, messages: &mut Vec<UIMessage>) {
        let Some(system) = messages.iter_mut().find(|m| m.role == Role::System) else {
            messages.insert(0, UIMessage::system(self.text.clone()));
            return;
        };

        let existing = system.parts.iter_mut().find_map(|part| match part {
            UIMessagePart::Text { text } => Some(text),
            _ => None,
        });
        match existing {
            Some(text) if text.trim().is_empty() => text.clone_from(&self.text),
            Some(text) => {
                *text = match self.position {
                    InjectionPosition::Before => format!("{}\n\n{text}", self.text),
                    InjectionPosition::After => format!("{text}\n\n{}", self.text),
                };
            }
            None => system.parts.push(UIMessagePart::text(self.text.clone())),
        }
    }
}

impl InputTransformer for PromptInjection {
    fn name(&self) -> &str {
        "prompt_injection"
    }

    fn transform<'a>(
        &'a self,
        messages: &'a mut Vec<UIMessage>,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        self.inject(messages);
        futures_util::future::ready(Ok(())).boxed()
    }
}

/// Replaces user Document parts with their text so models without document
/// support can read them.
///
/// Documents are read as UTF-8. A document that cannot be read stays as it
/// is and the transformer reports the failure after handling the rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAsPrompt;

impl InputTransformer for DocumentAsPrompt {
    fn name(&self) -> &str {
        "document_as_prompt"
    }

    fn transform<'a>(
        &'a self,
        messages: &'a mut Vec<UIMessage>,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            let mut failures = Vec::new();
            for message in messages.iter_mut().filter(|m| m.role == Role::User) {
                for part in &mut message.parts {
                    let UIMessagePart::Document { url, file_name, .. } = part else {
                        continue;
                    };
                    match read_document(url).await {
                        Ok(content) => {
                            *part = UIMessagePart::text(format!(
                                "## user sent a file: {file_name}\n<content>\n{content}\n</content>"
                            ));
                        }
                        Err(err) => {
                            tracing::warn!(file_name = %file_name, "document read failed: {err:#}");
                            failures.push(format!("{file_name}: {err:#}"));
                        }
                    }
                }
            }
            if failures.is_empty() {
                Ok(())
            } else {
                bail!("could not read {}", failures.join("; "))
            }
        }
        .boxed()
    }
}

async fn read_document(url: &str) -> anyhow::Result<String> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (meta, data) = rest
            .split_once(',')
            .context("data URL is missing its payload")?;
        let bytes = if meta.ends_with(";base64") {
            BASE64.decode(data).context("invalid base64 payload")?
        } else {
            data.as_bytes().to_vec()
        };
        return String::from_utf8(bytes).context("document is not UTF-8 text");
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        bail!("remote documents are not supported");
    }

    let path = if url.starts_with("file://") {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .with_context(|| format!("invalid file URL {url}"))?
    } else {
        PathBuf::from(url)
    };
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    String::from_utf8(bytes).context("document is not UTF-8 text")
}

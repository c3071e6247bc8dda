//! Chat command handler.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use relay_core::config::Config;
use relay_core::generation::transformer::{DocumentAsPrompt, PromptInjection, ThinkTagTransformer};
use relay_core::generation::{
    GenerationEvent, GenerationOutcome, GenerationRequest, Orchestrator, TextBackend,
};
use relay_core::message::{Role, UIMessage, UIMessagePart};
use relay_core::providers::{Model, TextGenerationParams};
use tokio_util::sync::CancellationToken;

use super::{find_provider, provider_manager};
use crate::cli::{ChatArgs, Interrupted};

pub async fn run(config: &Config, args: &ChatArgs) -> Result<()> {
    let setting = find_provider(config, &args.provider)?.clone();
    let model = setting
        .find_model(&args.model)
        .cloned()
        .unwrap_or_else(|| Model::new(&args.model));

    let mut params = TextGenerationParams::new(model);
    params.thinking_budget = args.thinking_budget;
    params.max_tokens = args.max_tokens;
    params.temperature = args.temperature;

    let backend: Arc<dyn TextBackend> = Arc::new(provider_manager(config)?);
    let mut orchestrator = Orchestrator::new(backend, config.generation.options())
        .with_input_transformer(DocumentAsPrompt);
    if let Some(system) = args.system.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        orchestrator = orchestrator.with_input_transformer(PromptInjection::prepend(system));
    }
    if args.think_tags {
        orchestrator = orchestrator.with_output_transformer(ThinkTagTransformer);
    }

    tracing::debug!(provider = %args.provider, model = %args.model, "starting chat turn");
    let request = GenerationRequest::new(setting, params, vec![user_message(args)?]);
    let cancel = CancellationToken::new();
    let mut handle = orchestrator.start(request, cancel.clone());

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut printer = TextPrinter::new(!args.think_tags);
    let mut outcome = None;
    while let Some(event) = handle.next_event().await {
        match event.as_ref() {
            GenerationEvent::Snapshot { messages } => printer.update(messages)?,
            GenerationEvent::TransformerFailed {
                transformer,
                message,
            } => eprintln!("warning: {transformer}: {message}"),
            GenerationEvent::Finished { outcome: done } => {
                outcome = Some(done.clone());
                break;
            }
            _ => {}
        }
    }
    printer.finish()?;

    match outcome {
        Some(GenerationOutcome::Done) => Ok(()),
        Some(GenerationOutcome::Cancelled) => Err(Interrupted.into()),
        Some(GenerationOutcome::Failed { failure }) => bail!("{failure}"),
        None => bail!("generation ended without a result"),
    }
}

fn user_message(args: &ChatArgs) -> Result<UIMessage> {
    let mut parts = Vec::with_capacity(args.files.len() + 1);
    for path in &args.files {
        let absolute = std::path::absolute(path)
            .with_context(|| format!("resolve {}", path.display()))?;
        let file_name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        parts.push(UIMessagePart::Document {
            url: absolute.to_string_lossy().into_owned(),
            file_name,
            mime: "text/plain".to_string(),
        });
    }
    parts.push(UIMessagePart::text(args.prompt.as_str()));
    Ok(UIMessage::new(Role::User, parts))
}

/// Writes the growing assistant text to stdout as snapshots arrive.
struct TextPrinter {
    streaming: bool,
    message_id: Option<String>,
    printed: usize,
    last_text: String,
}

impl TextPrinter {
    fn new(streaming: bool) -> Self {
        Self {
            streaming,
            message_id: None,
            printed: 0,
            last_text: String::new(),
        }
    }

    fn update(&mut self, messages: &[UIMessage]) -> Result<()> {
        let Some(last) = messages.last().filter(|m| m.role == Role::Assistant) else {
            return Ok(());
        };
        if self.message_id.as_deref() != Some(last.id.as_str()) {
            if self.printed > 0 && self.streaming {
                println!();
            }
            self.message_id = Some(last.id.clone());
            self.printed = 0;
        }
        self.last_text = last.text();
        if self.streaming {
            self.flush_new_text()?;
        }
        Ok(())
    }

    fn flush_new_text(&mut self) -> Result<()> {
        if let Some(new) = self.last_text.get(self.printed..)
            && !new.is_empty()
        {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(new.as_bytes())?;
            stdout.flush()?;
            self.printed = self.last_text.len();
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.streaming {
            self.printed = 0;
        }
        self.flush_new_text()?;
        if self.printed > 0 {
            println!();
        }
        Ok(())
    }
}

//! Message rewrites applied around the network call.
//!
//! Input transformers run in order over the whole conversation before the
//! first request. Output transformers run over the finished assistant
//! message. A transformer that fails must leave every piece of content it
//! could not handle in place; the orchestrator reports the failure and
//! carries on with whatever the transformer left.

mod input;
mod output;

use futures_util::future::BoxFuture;

pub use input::{DocumentAsPrompt, InjectionPosition, PromptInjection};
pub use output::{Base64ImageSaver, RegexTransformer, ThinkTagTransformer};

use crate::message::UIMessage;

pub trait InputTransformer: Send + Sync {
    fn name(&self) -> &str;

    fn transform<'a>(&'a self, messages: &'a mut Vec<UIMessage>)
    -> BoxFuture<'a, anyhow::Result<()>>;
}

pub trait OutputTransformer: Send + Sync {
    fn name(&self) -> &str;

    fn transform<'a>(&'a self, message: &'a mut UIMessage) -> BoxFuture<'a, anyhow::Result<()>>;
}

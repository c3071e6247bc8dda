//! Tools the model can call during a turn.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::message::UIMessagePart;
use crate::providers::ToolDefinition;

/// A callable tool.
///
/// `execute` returns a `'static` future so calls can run concurrently on
/// their own tasks.
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Whether this call must wait for an explicit approval decision.
    fn needs_approval(&self, _input: &Value) -> bool {
        false
    }

    /// Runs the tool. Errors are reported to the model as output text.
    fn execute(&self, input: Value) -> BoxFuture<'static, anyhow::Result<Vec<UIMessagePart>>>;
}

type ApprovalPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A [`Tool`] backed by an async closure.
pub struct FnTool<F> {
    definition: ToolDefinition,
    approval: Option<ApprovalPredicate>,
    handler: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<UIMessagePart>>> + Send + 'static,
{
    pub fn new(definition: ToolDefinition, handler: F) -> Self {
        Self {
            definition,
            approval: None,
            handler,
        }
    }

    /// Every call needs approval.
    #[must_use]
    pub fn requires_approval(self) -> Self {
        self.approval_when(|_| true)
    }

    /// Calls whose input matches `predicate` need approval.
    #[must_use]
    pub fn approval_when(
        mut self,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.approval = Some(Arc::new(predicate));
        self
    }
}

impl<F> fmt::Debug for FnTool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.definition.name)
            .field("approval", &self.approval.is_some())
            .finish_non_exhaustive()
    }
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<UIMessagePart>>> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn needs_approval(&self, input: &Value) -> bool {
        self.approval.as_ref().is_some_and(|predicate| predicate(input))
    }

    fn execute(&self, input: Value) -> BoxFuture<'static, anyhow::Result<Vec<UIMessagePart>>> {
        (self.handler)(input).boxed()
    }
}

/// Tools offered for one turn, looked up by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool. A later tool with the same name replaces the earlier one.
    #[must_use]
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.insert(Arc::new(tool));
        self
    }

    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if let Some(&index) = self.by_name.get(&name) {
            self.tools[index] = tool;
        } else {
            self.by_name.insert(name, self.tools.len());
            self.tools.push(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.by_name.keys().collect();
        names.sort();
        f.debug_struct("ToolSet").field("tools", &names).finish()
    }
}

/// Output text for a failed call.
pub(crate) fn error_output(message: impl fmt::Display) -> Vec<UIMessagePart> {
    vec![UIMessagePart::text(format!("Error: {message}"))]
}

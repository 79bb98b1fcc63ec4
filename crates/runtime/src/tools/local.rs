//! In-process tools that sit next to the remote services.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{NAME_SEPARATOR, ToolDescriptor, ToolError};
use crate::aggregate::Document;
use crate::model::ToolSpec;

/// What a local tool hands back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalOutput {
    pub content: String,
    pub structured: Option<Value>,
    /// Extra documents beyond the one made from `content`.
    pub documents: Vec<Document>,
}

impl LocalOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured = Some(value);
        self
    }
}

/// A synchronous tool executed in this process.
pub trait LocalTool: Send + Sync + 'static {
    fn descriptor(&self) -> ToolDescriptor;

    fn call(&self, arguments: &Map<String, Value>) -> Result<LocalOutput, ToolError>;
}

/// A local tool backed by a closure.
pub struct FnTool<F> {
    descriptor: ToolDescriptor,
    handler: F,
}

impl<F> FnTool<F>
where
    F: Fn(&Map<String, Value>) -> Result<LocalOutput, ToolError> + Send + Sync + 'static,
{
    pub fn new(descriptor: ToolDescriptor, handler: F) -> Self {
        Self {
            descriptor,
            handler,
        }
    }
}

impl<F> LocalTool for FnTool<F>
where
    F: Fn(&Map<String, Value>) -> Result<LocalOutput, ToolError> + Send + Sync + 'static,
{
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    fn call(&self, arguments: &Map<String, Value>) -> Result<LocalOutput, ToolError> {
        (self.handler)(arguments)
    }
}

struct Registered {
    descriptor: ToolDescriptor,
    tool: Arc<dyn LocalTool>,
}

/// The set of local tools available to a run.
#[derive(Clone, Default)]
pub struct LocalTools {
    tools: BTreeMap<String, Arc<Registered>>,
}

impl std::fmt::Debug for LocalTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.tools.keys()).finish()
    }
}

impl LocalTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Names must be unique and may not contain the remote
    /// name separator.
    pub fn register(&mut self, tool: impl LocalTool) -> Result<(), ToolError> {
        let descriptor = tool.descriptor();
        let name = descriptor.name.clone();
        if name.is_empty() || name.contains(NAME_SEPARATOR) {
            return Err(ToolError::InvalidArguments(format!(
                "local tool name '{name}' is empty or contains '{NAME_SEPARATOR}'"
            )));
        }
        if self.tools.contains_key(&name) {
            return Err(ToolError::InvalidArguments(format!(
                "local tool '{name}' registered twice"
            )));
        }
        self.tools.insert(
            name,
            Arc::new(Registered {
                descriptor,
                tool: Arc::new(tool),
            }),
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|r| &r.descriptor)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|r| r.descriptor.spec(r.descriptor.name.clone()))
            .collect()
    }

    /// Run a tool on the blocking pool.
    pub async fn call(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<LocalOutput, ToolError> {
        let registered = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        let missing = registered.descriptor.schema.missing_required(&arguments);
        if !missing.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            )));
        }

        tokio::task::spawn_blocking(move || registered.tool.call(&arguments))
            .await
            .map_err(|e| ToolError::Execution(format!("local tool panicked: {e}")))?
    }
}

//! Bounded model/tool loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use policy::ToolFilter;
use serde_json::{Map, Value};
use storage::CallRecord;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::{Aggregator, Document, RunOutput, Termination, ToolOutcome};
use crate::audit::{AuditSink, NoopAudit};
use crate::conversation::Conversation;
use crate::model::{Backend, Message, ModelRequest, ModelResponse, ToolCall, ToolResult, ToolSpec};
use crate::progress::{Progress, summarize};
use crate::tools::{LocalTools, ToolError, ToolRegistry, split_qualified};
use crate::{Error, Result};

pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Rounds that may offer tools. One tool-less call follows if they run out.
    pub max_rounds: u32,
    pub conversation_id: String,
    pub progress: Option<UnboundedSender<Progress>>,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            conversation_id: Uuid::new_v4().to_string(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = id.into();
        self
    }

    pub fn with_progress(mut self, progress: UnboundedSender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn emit(&self, event: Progress) {
        if let Some(tx) = &self.progress {
            // A dropped receiver just means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

enum Route<'a> {
    Remote { service: &'a str, tool: &'a str },
    Local(&'a str),
}

impl Route<'_> {
    fn service(&self) -> Option<String> {
        match self {
            Route::Remote { service, .. } => Some(service.to_string()),
            Route::Local(_) => None,
        }
    }

    fn tool(&self) -> &str {
        match self {
            Route::Remote { tool, .. } => *tool,
            Route::Local(name) => *name,
        }
    }
}

struct Executed {
    text: String,
    structured: Option<Value>,
    documents: Vec<Document>,
}

/// Drives a model through rounds of tool calls until it answers.
pub struct Orchestrator<B> {
    backend: B,
    registry: Arc<ToolRegistry>,
    local: LocalTools,
    audit: Arc<dyn AuditSink>,
}

impl<B: Backend> Orchestrator<B> {
    pub fn new(backend: B, registry: Arc<ToolRegistry>) -> Self {
        Self {
            backend,
            registry,
            local: LocalTools::new(),
            audit: Arc::new(NoopAudit),
        }
    }

    pub fn with_local_tools(mut self, local: LocalTools) -> Self {
        self.local = local;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn local_tools(&self) -> &LocalTools {
        &self.local
    }

    /// Local tools followed by the remote tools `filter` admits, each name
    /// listed once.
    pub async fn available_tools(&self, filter: Option<&ToolFilter>) -> Vec<ToolSpec> {
        let mut seen = HashSet::new();
        self.local
            .specs()
            .into_iter()
            .chain(self.registry.available_tools(filter).await)
            .filter(|spec| seen.insert(spec.name.clone()))
            .collect()
    }

    /// Run the loop over `messages`, offering `tools` to the model.
    ///
    /// Only tools in `tools` can be called. A backend error in a regular
    /// round aborts the run; tool errors are fed back to the model.
    pub async fn run(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolSpec>,
        options: RunOptions,
    ) -> Result<RunOutput> {
        let exposed: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let mut conversation = Conversation::new(messages);
        let mut aggregate = Aggregator::new();

        info!(
            conversation_id = %options.conversation_id,
            tools = tools.len(),
            max_rounds = options.max_rounds,
            "starting run"
        );

        for round in 0..options.max_rounds {
            options.emit(Progress::RoundStarted {
                round,
                max_rounds: options.max_rounds,
            });
            debug!(conversation_id = %options.conversation_id, round, "calling model");

            let response = self
                .call_model(conversation.messages(), &tools, &options.cancel)
                .await?;
            aggregate.record_model_call(response.usage);

            let calls = response.message.tool_calls();
            let text = response.message.text();
            conversation.push(response.message);

            if calls.is_empty() {
                return Ok(self.finish(
                    aggregate,
                    conversation,
                    Some(text),
                    Termination::Answered,
                    &options,
                ));
            }

            debug!(round, calls = calls.len(), "executing tool calls");
            for call in &calls {
                self.execute(round, call, &exposed, &options, &mut aggregate, &mut conversation)
                    .await;
            }
        }

        warn!(
            conversation_id = %options.conversation_id,
            rounds = options.max_rounds,
            "round budget exhausted, asking for a final answer without tools"
        );
        match self
            .call_model(conversation.messages(), &[], &options.cancel)
            .await
        {
            Ok(response) => {
                aggregate.record_model_call(response.usage);
                let text = response.message.text();
                conversation.push(response.message);
                Ok(self.finish(
                    aggregate,
                    conversation,
                    Some(text),
                    Termination::Exhausted,
                    &options,
                ))
            }
            Err(e) => {
                warn!(conversation_id = %options.conversation_id, error = %e, "final model call failed");
                Ok(self.finish(
                    aggregate,
                    conversation,
                    None,
                    Termination::ExhaustedFailed,
                    &options,
                ))
            }
        }
    }

    fn finish(
        &self,
        aggregate: Aggregator,
        conversation: Conversation,
        answer: Option<String>,
        termination: Termination,
        options: &RunOptions,
    ) -> RunOutput {
        let output = aggregate.finish(answer, termination, conversation.into_messages());
        info!(
            conversation_id = %options.conversation_id,
            ?termination,
            tool_calls = output.outcomes.len(),
            model_calls = output.model_calls,
            "run finished"
        );
        options.emit(Progress::FinalAnswer {
            text: output.final_answer.clone(),
            termination,
        });
        output
    }

    async fn call_model(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        cancel: &CancellationToken,
    ) -> Result<ModelResponse> {
        let request = ModelRequest { messages, tools };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            response = self.backend.call(request) => Ok(response?),
        }
    }

    /// Handle one intent. Always appends exactly one tool-result message.
    async fn execute(
        &self,
        round: u32,
        call: &ToolCall,
        exposed: &HashSet<&str>,
        options: &RunOptions,
        aggregate: &mut Aggregator,
        conversation: &mut Conversation,
    ) {
        options.emit(Progress::ToolCallStarted {
            id: call.id.clone(),
            name: call.name.clone(),
        });
        let started = Instant::now();

        let result = match parse_arguments(&call.arguments) {
            Ok(arguments) => match self.route(&call.name, exposed) {
                Ok(route) => {
                    let payload = Value::Object(arguments.clone()).to_string();
                    let result = self.dispatch(&route, arguments, &options.cancel).await;
                    self.audit(&route, payload, &result, elapsed_ms(started), options);
                    result
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        let duration_ms = elapsed_ms(started);

        let outcome = match result {
            Ok(executed) => {
                let outcome = ToolOutcome {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    round,
                    text: executed.text,
                    structured: executed.structured,
                    error: None,
                    duration_ms,
                };
                conversation.push(Message::tool_result(ToolResult {
                    tool_call_id: call.id.clone(),
                    content: outcome.text.clone(),
                    is_error: false,
                }));
                aggregate.record_success(outcome.clone(), executed.documents);
                outcome
            }
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, error = %e, "tool call failed");
                let message = e.to_string();
                let outcome = ToolOutcome {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    round,
                    text: message.clone(),
                    structured: None,
                    error: Some(message),
                    duration_ms,
                };
                conversation.push(Message::tool_result(ToolResult {
                    tool_call_id: call.id.clone(),
                    content: outcome.text.clone(),
                    is_error: true,
                }));
                aggregate.record_failure(outcome.clone());
                outcome
            }
        };

        options.emit(Progress::ToolCallFinished {
            id: outcome.tool_call_id,
            name: outcome.tool_name,
            is_error: outcome.error.is_some(),
            duration_ms,
            summary: summarize(&outcome.text),
        });
    }

    fn route<'a>(
        &self,
        name: &'a str,
        exposed: &HashSet<&str>,
    ) -> std::result::Result<Route<'a>, ToolError> {
        if !exposed.contains(name) {
            return Err(ToolError::Unknown(name.to_string()));
        }
        if self.local.contains(name) {
            return Ok(Route::Local(name));
        }
        match split_qualified(name) {
            Some((service, tool)) => Ok(Route::Remote { service, tool }),
            None => Err(ToolError::Unknown(name.to_string())),
        }
    }

    async fn dispatch(
        &self,
        route: &Route<'_>,
        arguments: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Executed, ToolError> {
        match route {
            Route::Remote { service, tool } => {
                let output = self
                    .registry
                    .call_tool(service, tool, arguments, cancel)
                    .await?;
                let text = output.result.text();
                Ok(Executed {
                    documents: vec![Document::remote(
                        *service,
                        *tool,
                        output.description,
                        text.clone(),
                    )],
                    structured: output.result.structured_content,
                    text,
                })
            }
            Route::Local(name) => {
                let output = self.local.call(name, arguments).await?;
                let description = self
                    .local
                    .descriptor(name)
                    .map(|d| d.description.clone())
                    .unwrap_or_default();
                let mut documents =
                    vec![Document::local(*name, description, output.content.clone())];
                documents.extend(output.documents);
                Ok(Executed {
                    text: output.content,
                    structured: output.structured,
                    documents,
                })
            }
        }
    }

    fn audit(
        &self,
        route: &Route<'_>,
        payload: String,
        result: &std::result::Result<Executed, ToolError>,
        duration_ms: u64,
        options: &RunOptions,
    ) {
        let record = CallRecord::new(
            options.conversation_id.clone(),
            route.service(),
            route.tool(),
            payload,
        );
        let record = match result {
            Ok(executed) => record.succeeded(executed.text.clone(), duration_ms),
            // Never reached the tool.
            Err(e) if e.is_rejected() => return,
            Err(e) => record.failed(e.status(), e.to_string(), duration_ms),
        };
        self.audit.record(record);
    }
}

/// Parse model-produced arguments. Blank text means no arguments.
fn parse_arguments(raw: &str) -> std::result::Result<Map<String, Value>, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ToolError::InvalidArguments(format!("malformed JSON: {e}"))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_arguments_are_empty_object() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert!(parse_arguments("  ").unwrap().is_empty());
        assert_eq!(parse_arguments(r#"{"a":1}"#).unwrap()["a"], 1);
    }

    #[test]
    fn non_object_arguments_rejected() {
        let err = parse_arguments("[1]").unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidArguments("expected a JSON object, got an array".into())
        );
        assert!(matches!(
            parse_arguments("{oops"),
            Err(ToolError::InvalidArguments(m)) if m.starts_with("malformed JSON")
        ));
    }

    #[test]
    fn default_options() {
        let options = RunOptions::default().with_max_rounds(2);
        assert_eq!(options.max_rounds, 2);
        assert!(!options.conversation_id.is_empty());
        assert!(options.progress.is_none());
    }
}

//! Results collected across the rounds of a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Message, Usage};

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSource {
    Mcp,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: DocumentSource,
    /// Set for remote tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub tool: String,
    #[serde(default)]
    pub tool_desc: String,
}

/// Text a successful tool call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            content: content.into(),
            metadata,
        }
    }

    pub fn remote(
        service: impl Into<String>,
        tool: impl Into<String>,
        tool_desc: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            content,
            DocumentMetadata {
                source: DocumentSource::Mcp,
                service: Some(service.into()),
                tool: tool.into(),
                tool_desc: tool_desc.into(),
            },
        )
    }

    pub fn local(
        tool: impl Into<String>,
        tool_desc: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            content,
            DocumentMetadata {
                source: DocumentSource::Local,
                service: None,
                tool: tool.into(),
                tool_desc: tool_desc.into(),
            },
        )
    }
}

/// How one tool call intent ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_call_id: String,
    /// Name as the model used it.
    pub tool_name: String,
    pub round: u32,
    /// What was fed back to the model.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model answered without asking for tools.
    Answered,
    /// The round budget ran out and the tool-less final call answered.
    Exhausted,
    /// The round budget ran out and the final call failed.
    ExhaustedFailed,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub documents: Vec<Document>,
    pub structured: Vec<Value>,
    pub outcomes: Vec<ToolOutcome>,
    /// Empty when the run ended in [`Termination::ExhaustedFailed`].
    pub final_answer: String,
    pub termination: Termination,
    pub conversation: Vec<Message>,
    pub usage: Usage,
    pub model_calls: u32,
}

impl RunOutput {
    pub fn failed_calls(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_error()).count()
    }
}

/// Accumulates results in the order they are produced.
#[derive(Debug, Default)]
pub struct Aggregator {
    documents: Vec<Document>,
    structured: Vec<Value>,
    outcomes: Vec<ToolOutcome>,
    usage: Usage,
    model_calls: u32,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_model_call(&mut self, usage: Usage) {
        self.model_calls += 1;
        self.usage += usage;
    }

    /// A call that succeeded, with the documents it produced.
    pub fn record_success(
        &mut self,
        outcome: ToolOutcome,
        documents: impl IntoIterator<Item = Document>,
    ) {
        self.documents
            .extend(documents.into_iter().filter(|d| !d.content.is_empty()));
        if let Some(value) = &outcome.structured {
            self.structured.push(value.clone());
        }
        self.outcomes.push(outcome);
    }

    pub fn record_failure(&mut self, outcome: ToolOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[ToolOutcome] {
        &self.outcomes
    }

    pub fn finish(
        self,
        final_answer: Option<String>,
        termination: Termination,
        conversation: Vec<Message>,
    ) -> RunOutput {
        RunOutput {
            documents: self.documents,
            structured: self.structured,
            outcomes: self.outcomes,
            final_answer: final_answer.unwrap_or_default(),
            termination,
            conversation,
            usage: self.usage,
            model_calls: self.model_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(id: &str, error: Option<&str>) -> ToolOutcome {
        ToolOutcome {
            tool_call_id: id.into(),
            tool_name: "clock__get_time".into(),
            round: 0,
            text: "noon".into(),
            structured: None,
            error: error.map(str::to_string),
            duration_ms: 1,
        }
    }

    #[test]
    fn keeps_production_order() {
        let mut agg = Aggregator::new();
        agg.record_model_call(Usage {
            input_tokens: 3,
            output_tokens: 1,
        });
        agg.record_success(
            ToolOutcome {
                structured: Some(json!({"hour": 12})),
                ..outcome("a", None)
            },
            [Document::remote("clock", "get_time", "Current time", "noon")],
        );
        agg.record_failure(outcome("b", Some("boom")));
        agg.record_success(outcome("c", None), [Document::local("lookup", "", "")]);

        let out = agg.finish(Some("done".into()), Termination::Answered, Vec::new());
        let ids: Vec<_> = out.outcomes.iter().map(|o| o.tool_call_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(out.documents.len(), 1);
        assert_eq!(out.documents[0].metadata.service.as_deref(), Some("clock"));
        assert_eq!(out.structured, [json!({"hour": 12})]);
        assert_eq!(out.failed_calls(), 1);
        assert_eq!(out.model_calls, 1);
    }

    #[test]
    fn failed_finish_has_empty_answer() {
        let out = Aggregator::new().finish(None, Termination::ExhaustedFailed, Vec::new());
        assert_eq!(out.final_answer, "");
    }

    #[test]
    fn document_ids_are_unique() {
        let a = Document::local("t", "", "x");
        let b = Document::local("t", "", "x");
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["metadata"]["source"], "local");
        assert!(json["metadata"].get("service").is_none());
    }
}

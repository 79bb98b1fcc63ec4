//! Typed tool descriptors, parsed once when a service is registered.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::model::ToolSpec;

/// One parameter of a tool's input object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remaining schema keywords (`enum`, `items`, ...), passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A tool's input schema: an object with named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSchema {
    pub properties: BTreeMap<String, ParamSpec>,
    pub required: BTreeSet<String>,
}

impl ToolSchema {
    /// Read a JSON schema leniently. Anything that is not an object schema
    /// yields an empty one.
    pub fn from_value(schema: &Value) -> Self {
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, spec)| {
                        let spec = serde_json::from_value(spec.clone()).unwrap_or_else(|_| {
                            ParamSpec {
                                extra: spec.as_object().cloned().unwrap_or_default(),
                                ..ParamSpec::default()
                            }
                        });
                        (name.clone(), spec)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            properties,
            required,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": self.properties,
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }

    /// Required parameters absent from `arguments`.
    pub fn missing_required<'a>(&'a self, arguments: &Map<String, Value>) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|name| !arguments.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// A tool as the registry knows it.
///
/// `input_schema` is the schema exactly as the service sent it and is what
/// the model sees. `schema` is the typed view used for argument checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: ToolSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: schema.to_value(),
            schema,
        }
    }

    pub fn from_wire(tool: &mcp::Tool) -> Self {
        let schema = ToolSchema::from_value(&tool.input_schema);
        let input_schema = if tool.input_schema.is_object() {
            tool.input_schema.clone()
        } else {
            schema.to_value()
        };
        Self {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            schema,
            input_schema,
        }
    }

    pub fn to_wire(&self) -> mcp::Tool {
        mcp::Tool {
            name: self.name.clone(),
            description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            input_schema: self.input_schema.clone(),
        }
    }

    /// The model-facing spec under `exposed_name`.
    pub fn spec(&self, exposed_name: impl Into<String>) -> ToolSpec {
        ToolSpec {
            name: exposed_name.into(),
            description: self.description.clone(),
            schema: self.input_schema.clone(),
        }
    }
}

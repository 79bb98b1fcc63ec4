//! Per-service tool allow-lists.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Allows every tool of a service when listed.
pub const WILDCARD: &str = "*";

/// Which remote tools a run may expose, keyed by service name.
///
/// Once a filter exists it is exhaustive: a service missing from it is
/// excluded, a service listed with no tools gets none, and a listed service
/// gets only the named tools. Having no filter at all allows everything;
/// see [`check`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolFilter {
    services: BTreeMap<String, BTreeSet<String>>,
}

/// Result of a filter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl ToolFilter {
    /// An empty filter, which excludes every service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a filter from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse a filter from a TOML table of `service = ["tool", ...]`.
    pub fn parse(toml: &str) -> Result<Self> {
        let filter: Self = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        filter.validate()?;
        Ok(filter)
    }

    /// Allow `tools` of `service`, adding to anything already allowed.
    pub fn allow<I, S>(mut self, service: impl Into<String>, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services
            .entry(service.into())
            .or_default()
            .extend(tools.into_iter().map(Into::into));
        self
    }

    /// List `service` with no tools.
    pub fn block(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into(), BTreeSet::new());
        self
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn check(&self, service: &str, tool: &str) -> Decision {
        let Some(allowed) = self.services.get(service) else {
            return Decision::Deny {
                reason: format!("service '{service}' is not in the allow-list"),
            };
        };
        if allowed.is_empty() {
            return Decision::Deny {
                reason: format!("service '{service}' allows no tools"),
            };
        }
        if allowed.contains(WILDCARD) || allowed.contains(tool) {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!("tool '{tool}' is not allowed for service '{service}'"),
            }
        }
    }

    pub fn allows(&self, service: &str, tool: &str) -> bool {
        self.check(service, tool).is_allowed()
    }

    fn validate(&self) -> Result<()> {
        for (service, tools) in &self.services {
            if service.is_empty() {
                return Err(Error::Invalid("empty service name".to_string()));
            }
            if tools.iter().any(String::is_empty) {
                return Err(Error::Invalid(format!(
                    "empty tool name for service '{service}'"
                )));
            }
        }
        Ok(())
    }
}

/// Check against an optional filter. No filter allows everything.
pub fn check(filter: Option<&ToolFilter>, service: &str, tool: &str) -> Decision {
    match filter {
        Some(filter) => filter.check(service, tool),
        None => Decision::Allow,
    }
}

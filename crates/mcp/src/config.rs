//! Per-service connection settings.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Request timeout applied when a service does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a remote tool service is reached.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ServiceConfig {
    /// One POST per request; the reply comes back on the same response.
    Direct(EndpointConfig),
    /// A long-lived event stream carries replies for requests posted elsewhere.
    Stream(EndpointConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub endpoint: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Sent as a bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_enabled() -> bool {
    true
}

impl EndpointConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: BTreeMap::new(),
            credential: None,
            timeout_secs: default_timeout_secs(),
            enabled: true,
        }
    }

    /// Check the endpoint and headers and build what a transport needs.
    pub(crate) fn settings(&self) -> Result<EndpointSettings> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint '{}': {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "unsupported endpoint scheme '{}'",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }
        if let Some(credential) = self.credential.as_deref().filter(|c| !c.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {credential}"))
                .map_err(|e| Error::Config(format!("invalid credential: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let timeout = match self.timeout_secs {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        };

        Ok(EndpointSettings {
            url,
            headers,
            timeout,
        })
    }
}

impl ServiceConfig {
    pub fn direct(endpoint: impl Into<String>) -> Self {
        Self::Direct(EndpointConfig::new(endpoint))
    }

    pub fn stream(endpoint: impl Into<String>) -> Self {
        Self::Stream(EndpointConfig::new(endpoint))
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        match self {
            Self::Direct(config) | Self::Stream(config) => config,
        }
    }

    fn endpoint_mut(&mut self) -> &mut EndpointConfig {
        match self {
            Self::Direct(config) | Self::Stream(config) => config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint().enabled
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.endpoint_mut().credential = Some(credential.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.endpoint_mut().headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_mut().timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Validate without connecting.
    pub fn validate(&self) -> Result<()> {
        self.endpoint().settings().map(|_| ())
    }
}

/// Validated endpoint settings shared by both transports.
#[derive(Debug, Clone)]
pub(crate) struct EndpointSettings {
    pub url: Url,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

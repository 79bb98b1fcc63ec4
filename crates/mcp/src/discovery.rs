//! Finding the submission endpoint announced on a freshly opened event stream.

use reqwest::Url;
use tracing::warn;

use crate::sse::Event;

/// Where requests for a stream session are posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    pub session_id: String,
    pub submission_url: Url,
}

/// Recognizes the endpoint announcement among the first events of a stream.
///
/// Events that are not an announcement return `None` and are skipped.
pub trait EndpointDiscovery: Send + Sync + std::fmt::Debug {
    fn discover(&self, base: &Url, event: &Event) -> Option<SessionEndpoint>;
}

/// Resolves the event data against the stream URL and takes the session id
/// from a query parameter, e.g. `/messages/?session_id=abc123`.
///
/// The submission URL must share the stream URL's origin. Requests carry the
/// service credential, so an announcement naming another host is ignored.
#[derive(Debug, Clone)]
pub struct QueryParamDiscovery {
    params: Vec<String>,
}

impl QueryParamDiscovery {
    pub fn new(params: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            params: params.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for QueryParamDiscovery {
    fn default() -> Self {
        Self::new(["session_id", "sessionId"])
    }
}

impl EndpointDiscovery for QueryParamDiscovery {
    fn discover(&self, base: &Url, event: &Event) -> Option<SessionEndpoint> {
        let data = event.data.trim();
        if data.is_empty() || data.starts_with('{') {
            return None;
        }

        let url = base.join(data).ok()?;
        if url.origin() != base.origin() {
            warn!(announced = %url, "ignoring endpoint on a different origin");
            return None;
        }
        let session_id = url
            .query_pairs()
            .find(|(key, _)| self.params.iter().any(|p| p == key))
            .map(|(_, value)| value.into_owned())
            .filter(|id| !id.is_empty())?;

        Some(SessionEndpoint {
            session_id,
            submission_url: url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> Event {
        Event {
            event: Some("endpoint".to_string()),
            data: data.to_string(),
        }
    }

    fn base() -> Url {
        Url::parse("http://tools.local:8080/sse").unwrap()
    }

    #[test]
    fn relative_path() {
        let found = QueryParamDiscovery::default()
            .discover(&base(), &event("/messages/?session_id=abc123"))
            .unwrap();
        assert_eq!(found.session_id, "abc123");
        assert_eq!(
            found.submission_url.as_str(),
            "http://tools.local:8080/messages/?session_id=abc123"
        );
    }

    #[test]
    fn absolute_url_on_same_origin_and_camel_case() {
        let found = QueryParamDiscovery::default()
            .discover(&base(), &event("http://tools.local:8080/rpc?sessionId=s-9&x=1"))
            .unwrap();
        assert_eq!(found.session_id, "s-9");
        assert_eq!(found.submission_url.path(), "/rpc");
    }

    #[test]
    fn other_origins_are_refused() {
        let discovery = QueryParamDiscovery::default();
        for data in [
            "http://other.local/rpc?session_id=s-9",
            "https://tools.local:8080/rpc?session_id=s-9",
            "http://tools.local:9090/rpc?session_id=s-9",
            "//evil.example/rpc?session_id=s-9",
        ] {
            assert!(discovery.discover(&base(), &event(data)).is_none(), "{data}");
        }
    }

    #[test]
    fn non_announcements_ignored() {
        let discovery = QueryParamDiscovery::default();
        assert!(discovery.discover(&base(), &event("hello")).is_none());
        assert!(discovery.discover(&base(), &event("/messages/?session_id=")).is_none());
        assert!(
            discovery
                .discover(&base(), &event(r#"{"jsonrpc":"2.0","id":1}"#))
                .is_none()
        );
    }

    #[test]
    fn custom_parameter() {
        let found = QueryParamDiscovery::new(["sid"])
            .discover(&base(), &event("/rpc?sid=42"))
            .unwrap();
        assert_eq!(found.session_id, "42");
    }
}

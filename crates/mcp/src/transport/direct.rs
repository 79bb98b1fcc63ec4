use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{SESSION_HEADER, Transport, http_client, http_error};
use crate::config::{EndpointConfig, EndpointSettings};
use crate::error::{Error, Result};
use crate::protocol::{
    self, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::sse;

/// One POST per request. The reply is either a JSON body or an event
/// stream body containing it.
#[derive(Debug)]
pub struct DirectTransport {
    http: reqwest::Client,
    settings: EndpointSettings,
    session_id: RwLock<Option<String>>,
}

impl DirectTransport {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let settings = config.settings()?;
        Ok(Self {
            http: http_client(settings.timeout)?,
            settings,
            session_id: RwLock::new(None),
        })
    }

    async fn post(&self, body: Vec<u8>) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(self.settings.url.clone())
            .headers(self.settings.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .timeout(self.settings.timeout)
            .body(body);
        if let Some(id) = self.session_id.read().clone() {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await.map_err(Error::network)?;
        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write();
            if current.as_deref() != Some(id) {
                debug!(session_id = id, "server assigned session");
                *current = Some(id.to_string());
            }
        }

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        Ok(response)
    }

    async fn exchange(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let response = self.post(protocol::encode(request)?).await?;
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        let body = response.text().await.map_err(Error::network)?;
        read_reply(&body, is_json, &request.id)
    }
}

/// Pull the reply for `id` out of a response body.
fn read_reply(body: &str, is_json: bool, id: &RequestId) -> Result<JsonRpcResponse> {
    if is_json {
        return matching(protocol::decode(body.as_bytes())?, id);
    }

    let events = sse::parse_events(body)?;
    if events.is_empty() && body.trim_start().starts_with('{') {
        return matching(protocol::decode(body.as_bytes())?, id);
    }
    for event in events {
        match protocol::decode(event.data.as_bytes()) {
            Ok(response) if response.id == *id => return Ok(response),
            Ok(response) => debug!(id = %response.id, "skipping reply for another request"),
            Err(e) => warn!(error = %e, "skipping malformed event"),
        }
    }
    Err(Error::Decode(format!("no reply for request {id} in response body")))
}

fn matching(response: JsonRpcResponse, id: &RequestId) -> Result<JsonRpcResponse> {
    if response.id == *id {
        Ok(response)
    } else {
        Err(Error::Decode(format!(
            "reply id {} does not match request {id}",
            response.id
        )))
    }
}

impl Transport for DirectTransport {
    /// Every request is its own connection; there is only ever one generation.
    async fn connect(&self, cancel: &CancellationToken) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(0)
    }

    async fn send(
        &self,
        request: &JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.exchange(request) => result,
        }
    }

    async fn notify(
        &self,
        notification: &JsonRpcNotification,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let body = protocol::encode_notification(notification)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.post(body) => result.map(|_| ()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.session_id.write().take();
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_from_json_body() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let reply = read_reply(body, true, &RequestId::from(1i64)).unwrap();
        assert_eq!(reply.id, RequestId::Number(1));
    }

    #[test]
    fn reply_from_event_body_skips_others() {
        let body = concat!(
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n",
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n\n",
            "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"x\":1}}\n\n",
        );
        let reply = read_reply(body, false, &RequestId::from(3i64)).unwrap();
        assert_eq!(reply.result, Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn bare_json_without_content_type() {
        let body = r#"{"jsonrpc":"2.0","id":"q","result":null}"#;
        assert!(read_reply(body, false, &RequestId::from("q")).is_ok());
    }

    #[test]
    fn mismatched_id_is_an_error() {
        let body = r#"{"jsonrpc":"2.0","id":8,"result":{}}"#;
        assert!(matches!(
            read_reply(body, true, &RequestId::from(9i64)),
            Err(Error::Decode(_))
        ));
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":8,\"result\":{}}\n\n";
        assert!(matches!(
            read_reply(body, false, &RequestId::from(9i64)),
            Err(Error::Decode(_))
        ));
    }
}

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{SESSION_HEADER, Transport, http_client, http_error};
use crate::config::{EndpointConfig, EndpointSettings};
use crate::correlator::Correlator;
use crate::discovery::{EndpointDiscovery, QueryParamDiscovery, SessionEndpoint};
use crate::error::{Error, Result};
use crate::protocol::{self, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::sse::{Event, EventDecoder};

/// How long `close` waits for the reader task before aborting it.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests are posted to a per-session URL; replies arrive on a
/// long-lived event stream read by a single background task.
///
/// The session is opened lazily on first use and reopened after the
/// stream drops. Each opened session gets a new generation number; a
/// reopened session has not seen the client's handshake.
#[derive(Debug)]
pub struct StreamTransport {
    http: reqwest::Client,
    settings: EndpointSettings,
    discovery: Arc<dyn EndpointDiscovery>,
    reply_timeout: Duration,
    close_timeout: Duration,
    session: Mutex<Option<Arc<Session>>>,
    session_id: RwLock<Option<String>>,
    generations: AtomicU64,
}

#[derive(Debug)]
struct Session {
    generation: u64,
    endpoint: SessionEndpoint,
    correlator: Arc<Correlator>,
    shutdown: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn is_alive(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}

impl StreamTransport {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let settings = config.settings()?;
        Ok(Self {
            http: http_client(settings.timeout)?,
            reply_timeout: settings.timeout,
            close_timeout: CLOSE_TIMEOUT,
            settings,
            discovery: Arc::new(QueryParamDiscovery::default()),
            session: Mutex::new(None),
            session_id: RwLock::new(None),
            generations: AtomicU64::new(0),
        })
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn EndpointDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Ceiling on how long a request waits for its reply.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Requests currently waiting on the stream.
    pub async fn pending_requests(&self) -> usize {
        match self.session.lock().await.as_ref() {
            Some(session) => session.correlator.len(),
            None => 0,
        }
    }

    /// Whether an open session is being read.
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.is_alive())
    }

    /// Return the live session, opening one if needed. Only one caller
    /// performs the handshake at a time.
    async fn session(&self, cancel: &CancellationToken) -> Result<Arc<Session>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.is_alive() {
                return Ok(Arc::clone(session));
            }
            info!(url = %self.settings.url, "event stream dropped; reconnecting");
        }
        *slot = None;
        *self.session_id.write() = None;

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(self.settings.timeout, self.open(generation)) => {
                result.map_err(|_| {
                    Error::Init("timed out waiting for the session endpoint".to_string())
                })??
            }
        };

        *self.session_id.write() = Some(session.endpoint.session_id.clone());
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn open(&self, generation: u64) -> Result<Arc<Session>> {
        let response = self
            .http
            .get(self.settings.url.clone())
            .headers(self.settings.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| Error::Init(format!("failed to open event stream: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Init(format!(
                "event stream request failed: {}",
                http_error(response).await
            )));
        }

        let mut events = EventReader::new(response);
        let endpoint = loop {
            let event = events
                .next()
                .await
                .map_err(|e| Error::Init(format!("event stream failed during handshake: {e}")))?
                .ok_or_else(|| {
                    Error::Init("event stream closed before announcing an endpoint".to_string())
                })?;
            match self.discovery.discover(&self.settings.url, &event) {
                Some(endpoint) => break endpoint,
                None => debug!(data = %event.data, "ignoring event before endpoint"),
            }
        };
        info!(
            session_id = %endpoint.session_id,
            submit = %endpoint.submission_url,
            generation,
            "event stream session established"
        );

        let correlator = Arc::new(Correlator::new());
        let shutdown = CancellationToken::new();
        let reader = tokio::spawn(read_events(
            events,
            Arc::clone(&correlator),
            shutdown.clone(),
        ));

        Ok(Arc::new(Session {
            generation,
            endpoint,
            correlator,
            shutdown,
            reader: parking_lot::Mutex::new(Some(reader)),
        }))
    }

    async fn submit(&self, session: &Session, body: Vec<u8>) -> Result<()> {
        let response = self
            .http
            .post(session.endpoint.submission_url.clone())
            .headers(self.settings.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(SESSION_HEADER, session.endpoint.session_id.as_str())
            .timeout(self.settings.timeout)
            .body(body)
            .send()
            .await
            .map_err(Error::network)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(http_error(response).await)
        }
    }
}

impl Transport for StreamTransport {
    async fn connect(&self, cancel: &CancellationToken) -> Result<u64> {
        Ok(self.session(cancel).await?.generation)
    }

    async fn send(
        &self,
        request: &JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse> {
        let session = self.session(cancel).await?;
        let body = protocol::encode(request)?;
        let mut pending = session.correlator.register(request.id.clone())?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.submit(&session, body) => result?,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            reply = tokio::time::timeout(self.reply_timeout, pending.recv()) => {
                reply.map_err(|_| Error::Timeout)?
            }
        }
    }

    async fn notify(
        &self,
        notification: &JsonRpcNotification,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let session = self.session(cancel).await?;
        let body = protocol::encode_notification(notification)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.submit(&session, body) => result,
        }
    }

    async fn close(&self) -> Result<()> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        *self.session_id.write() = None;
        session.shutdown.cancel();

        let Some(mut reader) = session.reader.lock().take() else {
            return Ok(());
        };
        match tokio::time::timeout(self.close_timeout, &mut reader).await {
            Ok(_) => {
                debug!(session_id = %session.endpoint.session_id, "event stream closed");
                Ok(())
            }
            Err(_) => {
                warn!("event stream reader did not stop in time; aborting it");
                reader.abort();
                Err(Error::Timeout)
            }
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().as_ref() {
            session.shutdown.cancel();
        }
    }
}

/// Pulls framed events off a streaming response body.
struct EventReader {
    response: reqwest::Response,
    decoder: EventDecoder,
    queued: VecDeque<Event>,
    finished: bool,
}

impl EventReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            decoder: EventDecoder::new(),
            queued: VecDeque::new(),
            finished: false,
        }
    }

    async fn next(&mut self) -> Result<Option<Event>> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            match self.response.chunk().await.map_err(Error::network)? {
                Some(bytes) => self.queued.extend(self.decoder.push(&bytes)?),
                None => {
                    self.finished = true;
                    self.queued.extend(self.decoder.finish()?);
                }
            }
        }
    }
}

/// The only reader of a session's stream. Exits on shutdown, end of
/// stream or read error; any request still waiting is failed.
async fn read_events(
    mut events: EventReader,
    correlator: Arc<Correlator>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = events.next() => next,
        };
        match next {
            Ok(Some(event)) => deliver(&correlator, &event),
            Ok(None) => {
                debug!("event stream ended");
                break;
            }
            Err(e) => {
                warn!(error = %e, "event stream read failed");
                break;
            }
        }
    }

    shutdown.cancel();
    let failed = correlator.fail_all();
    if failed > 0 {
        warn!(pending = failed, "failing requests left waiting on a closed stream");
    }
}

fn deliver(correlator: &Correlator, event: &Event) {
    let response = match protocol::decode(event.data.as_bytes()) {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, event = ?event.event, "ignoring non-reply event");
            return;
        }
    };
    let id = response.id.clone();
    if !correlator.dispatch(response) {
        warn!(%id, "reply for a request nobody is waiting on");
    }
}

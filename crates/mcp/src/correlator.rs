//! Matches replies arriving on an event stream to the requests waiting for them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::{JsonRpcResponse, RequestId};

struct Waiter {
    token: u64,
    reply: oneshot::Sender<JsonRpcResponse>,
}

/// Table of in-flight request ids.
///
/// Each id maps to a single-slot channel. Delivery never blocks: a reply
/// for an id nobody is waiting on is reported and dropped.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<RequestId, Waiter>>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.len())
            .finish()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting on `id`. The returned guard deregisters on drop.
    pub fn register(self: &Arc<Self>, id: RequestId) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return Err(Error::DuplicateRequestId(id));
        }
        pending.insert(id.clone(), Waiter { token, reply: tx });
        drop(pending);

        Ok(PendingReply {
            id,
            token,
            rx,
            correlator: Arc::clone(self),
        })
    }

    /// Remove `id` whatever state it is in. Returns whether it was present.
    pub fn deregister(&self, id: &RequestId) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Hand a reply to its waiter. Returns false when nobody was waiting.
    pub fn dispatch(&self, response: JsonRpcResponse) -> bool {
        let waiter = self.pending.lock().remove(&response.id);
        match waiter {
            Some(waiter) => waiter.reply.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop every waiter; each one observes a closed connection.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        drained.len()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, id: &RequestId, token: u64) {
        let mut pending = self.pending.lock();
        if pending.get(id).is_some_and(|w| w.token == token) {
            pending.remove(id);
        }
    }
}

/// A registered request waiting for its reply.
pub struct PendingReply {
    id: RequestId,
    token: u64,
    rx: oneshot::Receiver<JsonRpcResponse>,
    correlator: Arc<Correlator>,
}

impl PendingReply {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the reply. Fails once the stream side gives up on it.
    pub async fn recv(&mut self) -> Result<JsonRpcResponse> {
        (&mut self.rx).await.map_err(|_| Error::ConnectionClosed)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.correlator.release(&self.id, self.token);
    }
}

//! Fire-and-forget audit of executed tool calls.

use std::path::Path;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use storage::{CallLogStore, CallRecord};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receives one record per executed tool call. Must not block the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: CallRecord);
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record(&self, _record: CallRecord) {}
}

/// Writes records to a [`CallLogStore`] from a background thread.
pub struct StoreAuditSink {
    tx: Mutex<Option<mpsc::UnboundedSender<CallRecord>>>,
    worker: Mutex<Option<JoinHandle<CallLogStore>>>,
}

impl StoreAuditSink {
    pub fn spawn(store: CallLogStore) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CallRecord>();
        let worker = std::thread::spawn(move || {
            while let Some(record) = rx.blocking_recv() {
                if let Err(e) = store.append(&record) {
                    warn!(record = %record.id, tool = %record.tool, error = %e, "failed to write call record");
                }
            }
            store
        });
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> storage::Result<Self> {
        Ok(Self::spawn(CallLogStore::open(path)?))
    }

    /// Stop accepting records, wait for the queue to drain and hand back
    /// the store. Later calls return `None`.
    ///
    /// This blocks on the writer thread; from async code run it through
    /// [`tokio::task::spawn_blocking`].
    pub fn close(&self) -> Option<CallLogStore> {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take()?;
        match worker.join() {
            Ok(store) => Some(store),
            Err(_) => {
                warn!("audit writer thread panicked");
                None
            }
        }
    }
}

impl AuditSink for StoreAuditSink {
    fn record(&self, record: CallRecord) {
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) => {
                if tx.send(record).is_err() {
                    warn!("audit writer is gone, dropping call record");
                }
            }
            None => debug!(tool = %record.tool, "audit closed, dropping call record"),
        }
    }
}

/// Dropping without [`close`](StoreAuditSink::close) only stops intake.
/// The writer thread drains what is queued and exits on its own.
impl Drop for StoreAuditSink {
    fn drop(&mut self) {
        drop(self.tx.lock().take());
    }
}

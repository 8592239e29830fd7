//! Pending-call table.
//!
//! The single synchronization point between callers waiting on a response and
//! the receive loop delivering it. Each synchronous call owns a [`PendingCall`]
//! whose drop always removes its entry, so timed out or abandoned ids cannot
//! catch a late response.

use super::protocol::CallId;
use crate::{LinkError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// How a pending call ended, as delivered to its waiter.
#[derive(Debug)]
enum Resolution {
    Value(Bytes),
    Exception(Bytes),
    Closed(String),
}

/// Why a pending call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The deadline elapsed before a response arrived.
    TimedOut,
    /// The peer answered with an exception payload.
    Exception(Bytes),
    /// The link went away while the call was in flight.
    Closed(String),
}

struct Slot {
    serial: u64,
    tx: oneshot::Sender<Resolution>,
}

#[derive(Default)]
struct Table {
    calls: HashMap<CallId, Slot>,
    next_serial: u64,
    /// Set once the owning link stops; later registrations fail immediately.
    closed: Option<String>,
}

/// Thread-safe map of in-flight call ids to their result slots.
#[derive(Clone, Default)]
pub struct PendingCalls {
    table: Arc<Mutex<Table>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a waitable slot for `id`.
    pub fn register(&self, id: CallId) -> Result<PendingCall> {
        let mut table = self.table();
        if let Some(reason) = &table.closed {
            return Err(LinkError::closed(reason.clone()));
        }
        if table.calls.contains_key(&id) {
            return Err(LinkError::DuplicateCallId(id));
        }

        let (tx, rx) = oneshot::channel();
        let serial = table.next_serial;
        table.next_serial += 1;
        table.calls.insert(id, Slot { serial, tx });

        Ok(PendingCall {
            id,
            serial,
            rx,
            table: self.clone(),
        })
    }

    /// Deliver a response to the waiter registered under `id`.
    ///
    /// Unknown ids (void calls, timed out calls, stray duplicates) are
    /// discarded. Returns whether a waiter was woken.
    pub fn resolve(&self, id: CallId, payload: Bytes, is_exception: bool) -> bool {
        let slot = self.table().calls.remove(&id);
        match slot {
            Some(slot) => {
                trace!("resolved call {}", id);
                let resolution = if is_exception {
                    Resolution::Exception(payload)
                } else {
                    Resolution::Value(payload)
                };
                // The waiter may have been dropped between removal and send.
                slot.tx.send(resolution).is_ok()
            }
            None => {
                debug!("Discarding response for unknown call id {}", id);
                false
            }
        }
    }

    /// Fail every outstanding call with `reason` and refuse new registrations.
    ///
    /// Returns the number of calls released.
    pub fn release_all(&self, reason: &str) -> usize {
        let drained: Vec<Slot> = {
            let mut table = self.table();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.calls.drain().map(|(_, slot)| slot).collect()
        };

        let count = drained.len();
        for slot in drained {
            let _ = slot.tx.send(Resolution::Closed(reason.to_string()));
        }
        if count > 0 {
            debug!("Released {} pending calls: {}", count, reason);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.table().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, id: CallId, serial: u64) {
        let mut table = self.table();
        if table.calls.get(&id).is_some_and(|slot| slot.serial == serial) {
            table.calls.remove(&id);
        }
    }
}

/// Handle to one registered call.
pub struct PendingCall {
    id: CallId,
    serial: u64,
    rx: oneshot::Receiver<Resolution>,
    table: PendingCalls,
}

impl PendingCall {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Wait for the response, at most `deadline`.
    ///
    /// The entry is gone from the table when this returns, whatever the outcome.
    pub async fn wait(mut self, deadline: Duration) -> std::result::Result<Bytes, CallFailure> {
        match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(Ok(Resolution::Value(payload))) => Ok(payload),
            Ok(Ok(Resolution::Exception(payload))) => Err(CallFailure::Exception(payload)),
            Ok(Ok(Resolution::Closed(reason))) => Err(CallFailure::Closed(reason)),
            Ok(Err(_)) => Err(CallFailure::Closed("pending call dropped".to_string())),
            Err(_) => {
                debug!("Call {} timed out after {:?}", self.id, deadline);
                Err(CallFailure::TimedOut)
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.table.forget(self.id, self.serial);
    }
}

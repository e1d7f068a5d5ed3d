use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::oneshot;

use crate::error::ProbeError;

/// Correlation identity of one in-flight echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EchoKey {
    pub(crate) dest: Ipv4Addr,
    pub(crate) seq: u16,
}

/// What the receive loop hands to the waiter that sent the echo.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reply {
    pub(crate) at: Instant,
    pub(crate) size: usize,
}

/// Shared map from in-flight echoes to their reply slots.
///
/// Entries exist only between "echo sent" and "reply delivered or timeout
/// elapsed". The reply path and the timeout path may race to remove the
/// same key, which is why [`CorrelationTable::remove`] is idempotent.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    slots: RwLock<HashMap<EchoKey, oneshot::Sender<Reply>>>,
}

impl CorrelationTable {
    /// Creates a fresh single-use reply slot under `key` and returns its
    /// receiving end. A key that is already present is a sequencing bug.
    pub(crate) fn register(&self, key: EchoKey) -> Result<oneshot::Receiver<Reply>, ProbeError> {
        let mut slots = self.slots.write();
        if slots.contains_key(&key) {
            return Err(ProbeError::DuplicateEcho {
                dest: key.dest,
                seq: key.seq,
            });
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(key, tx);
        Ok(rx)
    }

    /// Completes the slot registered under `key`, if any. The value sits
    /// in the slot until the waiter reads it, so a reply arriving a moment
    /// before the waiter is ready is never lost. Returns whether anything
    /// was waiting.
    pub(crate) fn deliver(&self, key: &EchoKey, reply: Reply) -> bool {
        let slot = self.slots.write().remove(key);
        match slot {
            // The waiter may have timed out just now and dropped its end;
            // the failed send is indistinguishable from a late reply.
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Deletes the mapping for `key`. Removing an absent key is a no-op.
    pub(crate) fn remove(&self, key: &EchoKey) {
        self.slots.write().remove(key);
    }

    /// Number of echoes currently awaiting a reply.
    pub(crate) fn pending(&self) -> usize {
        self.slots.read().len()
    }
}

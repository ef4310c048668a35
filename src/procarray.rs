//! Host backend table: which connections exist, which of them hold a write
//! transaction, and delivery of cancellation requests.

use crate::error::GateError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackendId(pub u32);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTransaction {
    pub backend: BackendId,
    pub xid: TransactionId,
    pub database: String,
}

/// Transaction enumeration and cancellation, as consumed by mode control.
pub trait TransactionDirectory: Send + Sync {
    /// Every transaction holding a transaction id, across all databases.
    fn active_transactions(&self) -> Vec<ActiveTransaction>;

    /// Asks `backend` to abort transaction `xid`. Returns once the request
    /// is recorded; the backend acts on it at its next interrupt check.
    /// Fails with `TransactionEnded` when the backend is no longer running
    /// `xid`.
    fn request_cancel(&self, backend: BackendId, xid: TransactionId) -> Result<(), GateError>;
}

#[derive(Debug)]
struct ProcSlot {
    database: String,
    xid: Option<TransactionId>,
    cancel_pending: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct ProcArray {
    slots: RwLock<BTreeMap<BackendId, ProcSlot>>,
    next_backend: AtomicU32,
    next_xid: AtomicU64,
}

impl Default for ProcArray {
    fn default() -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            next_backend: AtomicU32::new(1),
            // Ids below 3 are reserved by convention for bootstrap/frozen.
            next_xid: AtomicU64::new(3),
        }
    }
}

impl ProcArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, database: &str) -> BackendId {
        let id = BackendId(self.next_backend.fetch_add(1, Ordering::Relaxed));
        self.slots.write().insert(
            id,
            ProcSlot {
                database: database.to_string(),
                xid: None,
                cancel_pending: Arc::new(AtomicBool::new(false)),
            },
        );
        id
    }

    pub fn unregister(&self, backend: BackendId) {
        self.slots.write().remove(&backend);
    }

    /// Returns the backend's transaction id, assigning one on first write.
    pub fn assign_xid(&self, backend: BackendId) -> Result<TransactionId, GateError> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(&backend)
            .ok_or(GateError::UnknownBackend(backend))?;
        if let Some(xid) = slot.xid {
            return Ok(xid);
        }
        let xid = TransactionId(self.next_xid.fetch_add(1, Ordering::Relaxed));
        slot.xid = Some(xid);
        Ok(xid)
    }

    pub fn current_xid(&self, backend: BackendId) -> Option<TransactionId> {
        self.slots.read().get(&backend).and_then(|slot| slot.xid)
    }

    /// Releases the transaction id. A cancellation aimed at the ended
    /// transaction is dropped with it.
    pub fn end_transaction(&self, backend: BackendId) {
        if let Some(slot) = self.slots.write().get_mut(&backend) {
            slot.xid = None;
            slot.cancel_pending.store(false, Ordering::Release);
        }
    }

    /// Consumes a pending cancellation for `backend`.
    pub fn check_for_interrupts(&self, backend: BackendId) -> Result<(), GateError> {
        let pending = self
            .slots
            .read()
            .get(&backend)
            .map(|slot| slot.cancel_pending.swap(false, Ordering::AcqRel))
            .unwrap_or(false);
        if pending {
            return Err(GateError::QueryCanceled { backend });
        }
        Ok(())
    }

    pub fn backend_count(&self) -> usize {
        self.slots.read().len()
    }
}

impl TransactionDirectory for ProcArray {
    fn active_transactions(&self) -> Vec<ActiveTransaction> {
        self.slots
            .read()
            .iter()
            .filter_map(|(backend, slot)| {
                slot.xid.map(|xid| ActiveTransaction {
                    backend: *backend,
                    xid,
                    database: slot.database.clone(),
                })
            })
            .collect()
    }

    fn request_cancel(&self, backend: BackendId, xid: TransactionId) -> Result<(), GateError> {
        // Held across the xid check so the transaction cannot end in between.
        let slots = self.slots.read();
        let slot = slots.get(&backend).ok_or(GateError::UnknownBackend(backend))?;
        if slot.xid != Some(xid) {
            return Err(GateError::TransactionEnded { backend, xid });
        }
        slot.cancel_pending.store(true, Ordering::Release);
        Ok(())
    }
}

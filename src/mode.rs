use crate::error::GateError;
use crate::shmem::ShmemRegistry;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Contents of the shared segment.
#[derive(Debug, Default)]
pub struct ModeRecord {
    // Read and written only while holding the tranche lock.
    readonly: AtomicBool,
}

/// Handle on the cluster-wide read-only flag. Every clone, and every handle
/// attached from the same registry, observes the same flag.
#[derive(Clone)]
pub struct ModeStore {
    record: Arc<ModeRecord>,
    guard: Arc<RwLock<()>>,
}

impl ModeStore {
    /// Space and lock reservations made while the host starts.
    pub fn request(shmem: &ShmemRegistry, segment: &str) {
        shmem.request_segment(segment, std::mem::size_of::<ModeRecord>());
        shmem.request_named_lock(segment);
    }

    /// Creates the record on first call and attaches to it afterwards.
    pub fn initialize(shmem: &ShmemRegistry, segment: &str) -> Result<Self, GateError> {
        let guard = shmem.named_lock(segment)?;
        let (record, found) = {
            let _exclusive = guard.write();
            shmem.attach_or_init(segment, ModeRecord::default)?
        };
        if found {
            debug!(segment, "attached to existing read-only flag");
        } else {
            info!(segment, "read-only flag initialized to read-write");
        }
        Ok(Self { record, guard })
    }

    pub fn get(&self) -> bool {
        let _shared = self.guard.read();
        self.record.readonly.load(Ordering::Relaxed)
    }

    pub fn set(&self, readonly: bool) {
        let _exclusive = self.guard.write();
        self.record.readonly.store(readonly, Ordering::Relaxed);
    }
}

impl fmt::Debug for ModeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeStore")
            .field("readonly", &self.get())
            .finish()
    }
}

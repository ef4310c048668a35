//! Host shared-memory allocator and named lock registry.
//!
//! Modules request segments and lock tranches while the host is starting and
//! attach to them in a later phase. The first attach creates a segment; every
//! later attach, including one after a subsystem restart, returns the same
//! instance.

use crate::error::GateError;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentRequest {
    size: usize,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<String, SegmentRequest>,
    segments: HashMap<String, Arc<dyn Any + Send + Sync>>,
    lock_requests: HashMap<String, usize>,
    locks: HashMap<String, Arc<RwLock<()>>>,
}

#[derive(Default)]
pub struct ShmemRegistry {
    inner: Mutex<Inner>,
}

impl ShmemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `size` bytes under `name`. Repeated requests keep the largest
    /// size.
    pub fn request_segment(&self, name: &str, size: usize) {
        let mut inner = self.inner.lock();
        let entry = inner
            .requests
            .entry(name.to_string())
            .or_insert(SegmentRequest { size });
        entry.size = entry.size.max(size);
        debug!(segment = name, size, "shared memory segment requested");
    }

    pub fn request_named_lock(&self, tranche: &str) {
        let mut inner = self.inner.lock();
        *inner.lock_requests.entry(tranche.to_string()).or_default() += 1;
        debug!(tranche, "named lock requested");
    }

    pub fn is_requested(&self, name: &str) -> bool {
        self.inner.lock().requests.contains_key(name)
    }

    /// Returns the segment registered under `name`, creating it with `init`
    /// when absent. The flag is `true` when an existing segment was found.
    pub fn attach_or_init<T, F>(&self, name: &str, init: F) -> Result<(Arc<T>, bool), GateError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut inner = self.inner.lock();
        let Some(request) = inner.requests.get(name).copied() else {
            return Err(GateError::shmem(format!(
                "segment '{name}' was not requested at startup"
            )));
        };
        if let Some(existing) = inner.segments.get(name) {
            let segment = Arc::clone(existing).downcast::<T>().map_err(|_| {
                GateError::shmem(format!("segment '{name}' holds a different type"))
            })?;
            return Ok((segment, true));
        }
        let needed = std::mem::size_of::<T>();
        if needed > request.size {
            return Err(GateError::shmem(format!(
                "segment '{name}' needs {needed} bytes, {} requested",
                request.size
            )));
        }
        let segment = Arc::new(init());
        inner
            .segments
            .insert(name.to_string(), segment.clone() as Arc<dyn Any + Send + Sync>);
        debug!(segment = name, size = needed, "shared memory segment created");
        Ok((segment, false))
    }

    /// Returns the lock for a requested tranche. All callers share one lock.
    pub fn named_lock(&self, tranche: &str) -> Result<Arc<RwLock<()>>, GateError> {
        let mut inner = self.inner.lock();
        if !inner.lock_requests.contains_key(tranche) {
            return Err(GateError::shmem(format!(
                "lock tranche '{tranche}' was not requested at startup"
            )));
        }
        let lock = inner
            .locks
            .entry(tranche.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())));
        Ok(Arc::clone(lock))
    }
}

#[cfg(test)]
mod tests {
    use super::ShmemRegistry;
    use crate::error::GateErrorCode;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn second_attach_finds_first_segment() {
        let shmem = ShmemRegistry::new();
        shmem.request_segment("flag", 8);
        let (first, found) = shmem
            .attach_or_init("flag", || AtomicBool::new(true))
            .expect("create");
        assert!(!found);
        let (second, found) = shmem
            .attach_or_init("flag", || AtomicBool::new(false))
            .expect("attach");
        assert!(found);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unrequested_or_mistyped_segments_fail() {
        let shmem = ShmemRegistry::new();
        let err = shmem
            .attach_or_init("missing", || 0u8)
            .expect_err("not requested");
        assert_eq!(err.code(), GateErrorCode::SharedMemory);

        shmem.request_segment("typed", 8);
        shmem.attach_or_init("typed", || 1u64).expect("create");
        let err = shmem
            .attach_or_init("typed", || 1u32)
            .expect_err("type mismatch");
        assert_eq!(err.code(), GateErrorCode::SharedMemory);
    }

    #[test]
    fn oversized_segment_is_refused() {
        let shmem = ShmemRegistry::new();
        shmem.request_segment("small", 1);
        assert!(shmem.attach_or_init("small", || [0u64; 4]).is_err());
    }

    #[test]
    fn named_lock_is_shared() {
        let shmem = ShmemRegistry::new();
        assert!(shmem.named_lock("gate").is_err());
        shmem.request_named_lock("gate");
        let a = shmem.named_lock("gate").expect("lock");
        let b = shmem.named_lock("gate").expect("lock");
        assert!(Arc::ptr_eq(&a, &b));
    }
}

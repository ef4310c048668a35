//! The two enforcement checkpoints and the state they share with mode control.

pub mod analysis;
pub mod execution;

pub use analysis::AnalysisGate;
pub use execution::ExecutionGate;

use crate::config::{Enablement, GateConfig};
use crate::error::GateError;
use crate::hooks::Checkpoint;
use crate::mode::ModeStore;
use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

#[derive(Debug, Default)]
pub(crate) struct GateStats {
    pub(crate) analysis_checks: AtomicU64,
    pub(crate) analysis_rejections: AtomicU64,
    pub(crate) execution_checks: AtomicU64,
    pub(crate) execution_rejections: AtomicU64,
    pub(crate) cancel_requests: AtomicU64,
    pub(crate) cancel_failures: AtomicU64,
    pub(crate) engage_count: AtomicU64,
    pub(crate) disengage_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GateMetrics {
    pub analysis_checks: u64,
    pub analysis_rejections: u64,
    pub execution_checks: u64,
    pub execution_rejections: u64,
    pub cancel_requests: u64,
    pub cancel_failures: u64,
    pub engage_count: u64,
    pub disengage_count: u64,
}

/// Per-host state of the module: enablement decided at load, the mode store
/// attached during shared-memory startup, and counters.
#[derive(Debug)]
pub struct GateState {
    config: GateConfig,
    enablement: Enablement,
    store: OnceLock<ModeStore>,
    pub(crate) stats: GateStats,
}

impl GateState {
    pub fn new(config: GateConfig, enablement: Enablement) -> Self {
        Self {
            config,
            enablement,
            store: OnceLock::new(),
            stats: GateStats::default(),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn enablement(&self) -> Enablement {
        self.enablement
    }

    pub fn is_enabled(&self) -> bool {
        self.enablement.is_enabled()
    }

    /// Keeps the first store handed in. Returns `false` if one was already
    /// attached.
    pub fn attach(&self, store: ModeStore) -> bool {
        self.store.set(store).is_ok()
    }

    pub fn store(&self) -> Option<&ModeStore> {
        self.store.get()
    }

    /// Current mode as the checkpoints see it. A disabled module never
    /// reports read-only, whatever the shared flag holds.
    pub fn cluster_is_readonly(&self) -> bool {
        self.is_enabled() && self.store().is_some_and(ModeStore::get)
    }

    pub(crate) fn check(
        &self,
        checkpoint: Checkpoint,
        command: &'static str,
        command_is_ro: bool,
    ) -> Result<(), GateError> {
        let (checks, rejections) = match checkpoint {
            Checkpoint::Analysis => (
                &self.stats.analysis_checks,
                &self.stats.analysis_rejections,
            ),
            Checkpoint::Execution => (
                &self.stats.execution_checks,
                &self.stats.execution_rejections,
            ),
        };
        checks.fetch_add(1, Ordering::Relaxed);
        if !command_is_ro && self.cluster_is_readonly() {
            rejections.fetch_add(1, Ordering::Relaxed);
            warn!(%checkpoint, command, "statement rejected, cluster is read-only");
            return Err(GateError::RejectedByPolicy {
                checkpoint,
                command,
            });
        }
        Ok(())
    }

    pub fn metrics(&self) -> GateMetrics {
        let s = &self.stats;
        GateMetrics {
            analysis_checks: s.analysis_checks.load(Ordering::Relaxed),
            analysis_rejections: s.analysis_rejections.load(Ordering::Relaxed),
            execution_checks: s.execution_checks.load(Ordering::Relaxed),
            execution_rejections: s.execution_rejections.load(Ordering::Relaxed),
            cancel_requests: s.cancel_requests.load(Ordering::Relaxed),
            cancel_failures: s.cancel_failures.load(Ordering::Relaxed),
            engage_count: s.engage_count.load(Ordering::Relaxed),
            disengage_count: s.disengage_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GateState;
    use crate::config::{Enablement, GateConfig};
    use crate::hooks::Checkpoint;
    use crate::mode::ModeStore;
    use crate::shmem::ShmemRegistry;

    fn attached(enablement: Enablement) -> GateState {
        let shmem = ShmemRegistry::new();
        ModeStore::request(&shmem, "rogate");
        let state = GateState::new(GateConfig::default(), enablement);
        assert!(state.attach(ModeStore::initialize(&shmem, "rogate").expect("init")));
        state
    }

    #[test]
    fn rejects_only_mutations_under_read_only() {
        let state = attached(Enablement::Enabled);
        state.check(Checkpoint::Analysis, "INSERT", false).expect("read-write");
        state.store().expect("store").set(true);
        state.check(Checkpoint::Analysis, "SELECT", true).expect("read");
        let err = state
            .check(Checkpoint::Execution, "INSERT", false)
            .expect_err("rejected");
        assert!(err.is_rejected_by_policy());

        let metrics = state.metrics();
        assert_eq!(metrics.analysis_checks, 2);
        assert_eq!(metrics.analysis_rejections, 0);
        assert_eq!(metrics.execution_rejections, 1);
    }

    #[test]
    fn disabled_module_ignores_stored_flag() {
        let state = attached(Enablement::NotListed);
        state.store().expect("store").set(true);
        assert!(!state.cluster_is_readonly());
        state
            .check(Checkpoint::Analysis, "DELETE", false)
            .expect("disabled gate never rejects");
    }

    #[test]
    fn unattached_state_is_read_write() {
        let state = GateState::new(GateConfig::default(), Enablement::Enabled);
        assert!(!state.cluster_is_readonly());
        assert!(state.store().is_none());
    }
}

//! Operator-invoked mode transitions.

use crate::error::GateError;
use crate::gate::{GateMetrics, GateState};
use crate::mode::ModeStore;
use crate::procarray::TransactionDirectory;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Outcome of an engage call. Partial cancellation is a normal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EngageReport {
    /// Transactions found when the scan ran.
    pub targeted: usize,
    /// Cancellation requests that were recorded.
    pub requested: usize,
    /// Transactions that ended between the scan and the request.
    pub finished: usize,
    /// Requests that could not be delivered.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeStatus {
    pub enabled: bool,
    pub readonly: bool,
    pub metrics: GateMetrics,
}

pub struct ModeControl {
    state: Arc<GateState>,
    transactions: Arc<dyn TransactionDirectory>,
}

impl ModeControl {
    pub fn new(state: Arc<GateState>, transactions: Arc<dyn TransactionDirectory>) -> Self {
        Self {
            state,
            transactions,
        }
    }

    fn store(&self) -> Result<&ModeStore, GateError> {
        if !self.state.is_enabled() {
            let config = self.state.config();
            return Err(GateError::ModuleNotEnabled {
                module: config.module_name.clone(),
                option: config.preload_option.clone(),
            });
        }
        self.state
            .store()
            .ok_or_else(|| GateError::shmem("read-only flag is not attached yet"))
    }

    /// Engages read-only mode. Cancellation requests go out before the flag
    /// is set so transactions already past their checkpoints are interrupted
    /// too.
    pub fn engage(&self) -> Result<EngageReport, GateError> {
        let store = self.store()?;
        let report = if self.state.config().cancel_on_engage {
            self.cancel_active_transactions()
        } else {
            EngageReport::default()
        };
        store.set(true);
        self.state.stats.engage_count.fetch_add(1, Ordering::Relaxed);
        info!(
            targeted = report.targeted,
            requested = report.requested,
            finished = report.finished,
            failed = report.failed,
            "cluster is now read-only"
        );
        Ok(report)
    }

    pub fn set_readonly(&self) -> Result<bool, GateError> {
        self.engage()?;
        Ok(true)
    }

    pub fn unset_readonly(&self) -> Result<bool, GateError> {
        let store = self.store()?;
        store.set(false);
        self.state
            .stats
            .disengage_count
            .fetch_add(1, Ordering::Relaxed);
        info!("cluster is now read-write");
        Ok(true)
    }

    pub fn get_readonly(&self) -> Result<bool, GateError> {
        Ok(self.store()?.get())
    }

    /// Never fails; a disabled module reports read-write.
    pub fn status(&self) -> ModeStatus {
        ModeStatus {
            enabled: self.state.is_enabled(),
            readonly: self.state.cluster_is_readonly(),
            metrics: self.state.metrics(),
        }
    }

    pub fn metrics(&self) -> GateMetrics {
        self.state.metrics()
    }

    fn cancel_active_transactions(&self) -> EngageReport {
        let active = self.transactions.active_transactions();
        let mut report = EngageReport {
            targeted: active.len(),
            ..EngageReport::default()
        };
        for txn in &active {
            match self.transactions.request_cancel(txn.backend, txn.xid) {
                Ok(()) => {
                    report.requested += 1;
                    debug!(
                        backend = %txn.backend,
                        xid = txn.xid.0,
                        database = txn.database.as_str(),
                        "cancellation requested"
                    );
                }
                Err(GateError::TransactionEnded { .. }) => {
                    report.finished += 1;
                    debug!(
                        backend = %txn.backend,
                        xid = txn.xid.0,
                        "transaction ended before cancellation"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        backend = %txn.backend,
                        xid = txn.xid.0,
                        error = %err,
                        "could not request cancellation"
                    );
                }
            }
        }
        let stats = &self.state.stats;
        stats
            .cancel_requests
            .fetch_add(report.requested as u64, Ordering::Relaxed);
        stats
            .cancel_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }
}

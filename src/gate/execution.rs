use crate::classify::classify_planned;
use crate::error::GateError;
use crate::gate::GateState;
use crate::hooks::{Checkpoint, ExecutorStartHook, QueryDesc};
use std::sync::Arc;
use tracing::trace;

/// Checkpoint run immediately before a planned statement starts executing.
///
/// Covers plans that never went through analysis in this backend, such as
/// cached prepared statements. Always ends in a terminal action: the
/// previous handler if one was installed, the host routine otherwise.
pub struct ExecutionGate {
    state: Arc<GateState>,
    prev: Option<Arc<dyn ExecutorStartHook>>,
    standard: Arc<dyn ExecutorStartHook>,
}

impl ExecutionGate {
    pub fn new(
        state: Arc<GateState>,
        prev: Option<Arc<dyn ExecutorStartHook>>,
        standard: Arc<dyn ExecutorStartHook>,
    ) -> Self {
        Self {
            state,
            prev,
            standard,
        }
    }
}

impl ExecutorStartHook for ExecutionGate {
    fn executor_start(&self, query: &QueryDesc) -> Result<(), GateError> {
        trace!(backend = %query.backend, "execution gate: entry");
        let command_is_ro = classify_planned(query.command);
        self.state
            .check(Checkpoint::Execution, query.command.as_str(), command_is_ro)?;
        match &self.prev {
            Some(prev) => prev.executor_start(query)?,
            None => self.standard.executor_start(query)?,
        }
        trace!(backend = %query.backend, "execution gate: exit");
        Ok(())
    }
}

use crate::classify::{ParsedStatement, classify_analyzed};
use crate::error::GateError;
use crate::gate::GateState;
use crate::hooks::{AnalyzeHook, Checkpoint};
use std::sync::Arc;
use tracing::trace;

/// Checkpoint run after parse analysis, before planning.
///
/// Holds no per-statement state, so nested analysis (for example the inner
/// statement of a `PREPARE`) re-enters it safely.
pub struct AnalysisGate {
    state: Arc<GateState>,
    prev: Option<Arc<dyn AnalyzeHook>>,
}

impl AnalysisGate {
    pub fn new(state: Arc<GateState>, prev: Option<Arc<dyn AnalyzeHook>>) -> Self {
        Self { state, prev }
    }
}

impl AnalyzeHook for AnalysisGate {
    fn post_parse_analyze(&self, stmt: &ParsedStatement) -> Result<(), GateError> {
        trace!("analysis gate: entry");
        let command_is_ro = classify_analyzed(stmt);
        let label = stmt
            .utility_kind()
            .map_or(stmt.command.as_str(), |kind| kind.as_str());
        self.state.check(Checkpoint::Analysis, label, command_is_ro)?;
        // No standard routine exists for this slot.
        if let Some(prev) = &self.prev {
            prev.post_parse_analyze(stmt)?;
        }
        trace!("analysis gate: exit");
        Ok(())
    }
}

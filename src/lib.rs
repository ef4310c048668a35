pub mod classify;
pub mod config;
pub mod control;
pub mod error;
pub mod gate;
pub mod hooks;
pub mod host;
#[cfg(test)]
mod lib_tests;
pub mod mode;
pub mod procarray;
pub mod shmem;

use crate::config::{GateConfig, SettingsSource, inspect_enablement};
use crate::control::ModeControl;
use crate::error::GateError;
use crate::gate::{AnalysisGate, ExecutionGate, GateState};
use crate::hooks::{AnalyzeHook, ExecutorStartHook, FunctionRegistry, HookRegistry, SqlFunction};
use crate::mode::ModeStore;
use crate::procarray::TransactionDirectory;
use crate::shmem::ShmemRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use crate::classify::{CommandKind, ParsedStatement, UtilityKind};
pub use crate::control::{EngageReport, ModeStatus};
pub use crate::error::GateErrorCode;
pub use crate::gate::GateMetrics;

/// Function names registered with the host at load.
pub const SET_READONLY: &str = "set_readonly";
pub const UNSET_READONLY: &str = "unset_readonly";
pub const GET_READONLY: &str = "get_readonly";

/// Host services the module binds to at load time.
pub struct HostContext<'a> {
    pub settings: &'a dyn SettingsSource,
    pub hooks: &'a Arc<HookRegistry>,
    pub shmem: &'a ShmemRegistry,
    pub transactions: Arc<dyn TransactionDirectory>,
    pub functions: &'a Arc<FunctionRegistry>,
}

struct SavedHooks {
    analyze: Option<Arc<dyn AnalyzeHook>>,
    executor_start: Option<Arc<dyn ExecutorStartHook>>,
    functions: Vec<RegisteredFunction>,
}

struct RegisteredFunction {
    name: &'static str,
    ours: SqlFunction,
    previous: Option<SqlFunction>,
}

/// The loaded read-only module: both checkpoints installed in the host's
/// slots and the mode control functions registered. Whatever it displaced
/// is kept for unload.
pub struct ReadOnlyModule {
    state: Arc<GateState>,
    control: Arc<ModeControl>,
    hooks: Arc<HookRegistry>,
    functions: Arc<FunctionRegistry>,
    saved: Mutex<Option<SavedHooks>>,
}

impl ReadOnlyModule {
    /// Runs once when the host loads the module, before shared memory is
    /// set up. The checkpoints are installed even when the module is not
    /// enabled; they then let everything through.
    pub fn load(host: HostContext<'_>, config: GateConfig) -> Arc<Self> {
        let enablement = inspect_enablement(host.settings, &config);
        if enablement.is_enabled() {
            ModeStore::request(host.shmem, &config.shmem_segment);
        }
        let state = Arc::new(GateState::new(config, enablement));

        let standard = host.hooks.standard_executor_start();
        let prev_analyze = host.hooks.install_analyze(|prev| {
            Arc::new(AnalysisGate::new(Arc::clone(&state), prev)) as Arc<dyn AnalyzeHook>
        });
        let prev_executor_start = host.hooks.install_executor_start(|prev| {
            Arc::new(ExecutionGate::new(Arc::clone(&state), prev, standard))
                as Arc<dyn ExecutorStartHook>
        });

        let control = Arc::new(ModeControl::new(Arc::clone(&state), host.transactions));
        let registered = register_functions(host.functions, &control);

        info!(
            module = state.config().module_name.as_str(),
            enabled = state.is_enabled(),
            chained_analyze = prev_analyze.is_some(),
            chained_executor_start = prev_executor_start.is_some(),
            "read-only module loaded"
        );
        Arc::new(Self {
            state,
            control,
            hooks: Arc::clone(host.hooks),
            functions: Arc::clone(host.functions),
            saved: Mutex::new(Some(SavedHooks {
                analyze: prev_analyze,
                executor_start: prev_executor_start,
                functions: registered,
            })),
        })
    }

    /// Creates or attaches the shared flag. Safe to call again after a
    /// subsystem restart; an existing flag keeps its value.
    pub fn shmem_startup(&self, shmem: &ShmemRegistry) -> Result<(), GateError> {
        if !self.state.is_enabled() {
            debug!("module not enabled, skipping shared memory startup");
            return Ok(());
        }
        let store = ModeStore::initialize(shmem, &self.state.config().shmem_segment)?;
        if !self.state.attach(store) {
            debug!("read-only flag already attached");
        }
        Ok(())
    }

    /// Puts back the handlers and functions found at load. A function
    /// that was registered over since is left alone. Calling it twice is a
    /// no-op.
    pub fn unload(&self) {
        let Some(saved) = self.saved.lock().take() else {
            return;
        };
        self.hooks.set_analyze(saved.analyze);
        self.hooks.set_executor_start(saved.executor_start);
        for function in saved.functions {
            if !self
                .functions
                .restore(function.name, &function.ours, function.previous)
            {
                warn!(name = function.name, "function replaced after load, leaving it registered");
            }
        }
        info!(
            module = self.state.config().module_name.as_str(),
            "read-only module unloaded"
        );
    }

    pub fn control(&self) -> &Arc<ModeControl> {
        &self.control
    }

    pub fn state(&self) -> &Arc<GateState> {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }
}

fn register_functions(
    functions: &FunctionRegistry,
    control: &Arc<ModeControl>,
) -> Vec<RegisteredFunction> {
    let c = Arc::clone(control);
    let set: SqlFunction = Arc::new(move || c.set_readonly().map(sql_bool));
    let c = Arc::clone(control);
    let unset: SqlFunction = Arc::new(move || c.unset_readonly().map(sql_bool));
    let c = Arc::clone(control);
    let get: SqlFunction = Arc::new(move || c.get_readonly().map(sql_bool));

    [(SET_READONLY, set), (UNSET_READONLY, unset), (GET_READONLY, get)]
        .into_iter()
        .map(|(name, ours)| RegisteredFunction {
            name,
            previous: functions.register(name, Arc::clone(&ours)),
            ours,
        })
        .collect()
}

fn sql_bool(value: bool) -> String {
    let text = if value { "t" } else { "f" };
    text.to_string()
}

use crate::classify::{CommandKind, ParsedStatement};
use crate::error::GateError;
use crate::procarray::BackendId;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Pipeline stage where a policy decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Analysis,
    Execution,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::Analysis => write!(f, "analysis"),
            Checkpoint::Execution => write!(f, "execution"),
        }
    }
}

/// Planned statement handed to the execution-start slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDesc {
    pub backend: BackendId,
    pub command: CommandKind,
    pub source_text: String,
}

/// Handler for the analysis-completion slot.
pub trait AnalyzeHook: Send + Sync {
    fn post_parse_analyze(&self, stmt: &ParsedStatement) -> Result<(), GateError>;
}

/// Handler for the execution-start slot.
pub trait ExecutorStartHook: Send + Sync {
    fn executor_start(&self, query: &QueryDesc) -> Result<(), GateError>;
}

/// The host's own execution-start routine. Runs when the slot is empty or
/// when the installed handler chain ends.
#[derive(Debug, Default)]
pub struct StandardExecutorStart;

impl ExecutorStartHook for StandardExecutorStart {
    fn executor_start(&self, _query: &QueryDesc) -> Result<(), GateError> {
        Ok(())
    }
}

/// Host callback slots. Each slot holds at most one handler; a module wraps
/// whatever it finds there and puts the previous value back on unload.
pub struct HookRegistry {
    analyze: Mutex<Option<Arc<dyn AnalyzeHook>>>,
    executor_start: Mutex<Option<Arc<dyn ExecutorStartHook>>>,
    standard_executor_start: Arc<dyn ExecutorStartHook>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new(Arc::new(StandardExecutorStart))
    }
}

impl HookRegistry {
    pub fn new(standard_executor_start: Arc<dyn ExecutorStartHook>) -> Self {
        Self {
            analyze: Mutex::new(None),
            executor_start: Mutex::new(None),
            standard_executor_start,
        }
    }

    /// Builds a handler from the current occupant and installs it in one step.
    /// Returns the handler that was replaced.
    pub fn install_analyze<F>(&self, wrap: F) -> Option<Arc<dyn AnalyzeHook>>
    where
        F: FnOnce(Option<Arc<dyn AnalyzeHook>>) -> Arc<dyn AnalyzeHook>,
    {
        let mut slot = self.analyze.lock();
        let prev = slot.take();
        *slot = Some(wrap(prev.clone()));
        prev
    }

    pub fn install_executor_start<F>(&self, wrap: F) -> Option<Arc<dyn ExecutorStartHook>>
    where
        F: FnOnce(Option<Arc<dyn ExecutorStartHook>>) -> Arc<dyn ExecutorStartHook>,
    {
        let mut slot = self.executor_start.lock();
        let prev = slot.take();
        *slot = Some(wrap(prev.clone()));
        prev
    }

    pub fn set_analyze(&self, hook: Option<Arc<dyn AnalyzeHook>>) -> Option<Arc<dyn AnalyzeHook>> {
        std::mem::replace(&mut *self.analyze.lock(), hook)
    }

    pub fn set_executor_start(
        &self,
        hook: Option<Arc<dyn ExecutorStartHook>>,
    ) -> Option<Arc<dyn ExecutorStartHook>> {
        std::mem::replace(&mut *self.executor_start.lock(), hook)
    }

    pub fn analyze_hook(&self) -> Option<Arc<dyn AnalyzeHook>> {
        self.analyze.lock().clone()
    }

    pub fn executor_start_hook(&self) -> Option<Arc<dyn ExecutorStartHook>> {
        self.executor_start.lock().clone()
    }

    pub fn standard_executor_start(&self) -> Arc<dyn ExecutorStartHook> {
        Arc::clone(&self.standard_executor_start)
    }

    /// Runs the analysis slot. The slot lock is released before the handler
    /// runs so nested analysis can re-enter.
    pub fn run_post_parse_analyze(&self, stmt: &ParsedStatement) -> Result<(), GateError> {
        match self.analyze_hook() {
            Some(hook) => hook.post_parse_analyze(stmt),
            None => Ok(()),
        }
    }

    pub fn run_executor_start(&self, query: &QueryDesc) -> Result<(), GateError> {
        match self.executor_start_hook() {
            Some(hook) => hook.executor_start(query),
            None => self.standard_executor_start.executor_start(query),
        }
    }
}

/// Zero-argument function callable from `SELECT name()`. Returns the text
/// form of its result.
pub type SqlFunction = Arc<dyn Fn() -> Result<String, GateError> + Send + Sync>;

/// Host catalog of callable functions.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<BTreeMap<String, SqlFunction>>,
}

impl FunctionRegistry {
    /// Registers `function` under `name` and returns the one it replaced.
    pub fn register(&self, name: &str, function: SqlFunction) -> Option<SqlFunction> {
        self.functions
            .write()
            .insert(name.to_ascii_lowercase(), function)
    }

    /// Puts `previous` back under `name`, or removes the entry, but only
    /// while `ours` is still the registered function. Returns false when
    /// someone else has registered over it since.
    pub fn restore(&self, name: &str, ours: &SqlFunction, previous: Option<SqlFunction>) -> bool {
        let key = name.to_ascii_lowercase();
        let mut functions = self.functions.write();
        match functions.get(&key) {
            Some(current) if Arc::ptr_eq(current, ours) => {}
            _ => return false,
        }
        match previous {
            Some(function) => functions.insert(key, function),
            None => functions.remove(&key),
        };
        true
    }

    pub fn call(&self, name: &str) -> Result<String, GateError> {
        let function = self
            .functions
            .read()
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| GateError::UnknownFunction {
                name: name.to_string(),
            })?;
        function()
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.read().keys().cloned().collect()
    }
}

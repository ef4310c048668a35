//! In-process reference host.
//!
//! Provides every collaborator the module needs (settings, callback slots,
//! shared segments, the backend table, a function catalog) and a backend
//! pipeline that drives statements through both checkpoints. Tables are row
//! counters; statements are recognized by keyword.

pub mod backend;
pub mod parse;
pub mod settings;

pub use backend::{Backend, Outcome, TxnState};
pub use settings::Settings;

use crate::config::GateConfig;
use crate::error::GateError;
use crate::hooks::{AnalyzeHook, ExecutorStartHook, FunctionRegistry, HookRegistry};
use crate::procarray::{ProcArray, TransactionDirectory};
use crate::shmem::ShmemRegistry;
use crate::{HostContext, ReadOnlyModule};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Committed table contents.
#[derive(Debug, Default)]
pub struct Storage {
    tables: RwLock<BTreeMap<String, u64>>,
}

impl Storage {
    pub fn rows(&self, table: &str) -> Option<u64> {
        self.tables.read().get(table).copied()
    }

    pub(crate) fn apply(&self, changes: BTreeMap<String, Option<u64>>) {
        if changes.is_empty() {
            return;
        }
        let mut tables = self.tables.write();
        for (table, rows) in changes {
            match rows {
                Some(rows) => tables.insert(table, rows),
                None => tables.remove(&table),
            };
        }
    }
}

pub(crate) struct Shared {
    pub(crate) settings: Settings,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) shmem: ShmemRegistry,
    pub(crate) procs: Arc<ProcArray>,
    pub(crate) functions: Arc<FunctionRegistry>,
    pub(crate) storage: Storage,
}

pub struct ClusterBuilder {
    settings: Settings,
    analyze: Option<Arc<dyn AnalyzeHook>>,
    executor_start: Option<Arc<dyn ExecutorStartHook>>,
    gate_config: Option<GateConfig>,
}

impl ClusterBuilder {
    /// Handler occupying the analysis slot before the module loads.
    pub fn analyze_hook(mut self, hook: Arc<dyn AnalyzeHook>) -> Self {
        self.analyze = Some(hook);
        self
    }

    /// Handler occupying the execution-start slot before the module loads.
    pub fn executor_start_hook(mut self, hook: Arc<dyn ExecutorStartHook>) -> Self {
        self.executor_start = Some(hook);
        self
    }

    /// Overrides the configuration otherwise derived from settings.
    pub fn gate_config(mut self, config: GateConfig) -> Self {
        self.gate_config = Some(config);
        self
    }

    /// Loads the module, then runs shared-memory startup.
    pub fn start(self) -> Result<Cluster, GateError> {
        let hooks = Arc::new(HookRegistry::default());
        hooks.set_analyze(self.analyze);
        hooks.set_executor_start(self.executor_start);
        let shared = Arc::new(Shared {
            settings: self.settings,
            hooks,
            shmem: ShmemRegistry::new(),
            procs: Arc::new(ProcArray::new()),
            functions: Arc::new(FunctionRegistry::default()),
            storage: Storage::default(),
        });
        let config = self
            .gate_config
            .unwrap_or_else(|| GateConfig::from_settings(&shared.settings));
        let transactions: Arc<dyn TransactionDirectory> = shared.procs.clone();
        let module = ReadOnlyModule::load(
            HostContext {
                settings: &shared.settings,
                hooks: &shared.hooks,
                shmem: &shared.shmem,
                transactions,
                functions: &shared.functions,
            },
            config,
        );
        module.shmem_startup(&shared.shmem)?;
        info!(enabled = module.is_enabled(), "cluster started");
        Ok(Cluster { shared, module })
    }
}

/// A running host with the read-only module loaded.
pub struct Cluster {
    shared: Arc<Shared>,
    module: Arc<ReadOnlyModule>,
}

impl Cluster {
    pub fn builder(settings: Settings) -> ClusterBuilder {
        ClusterBuilder {
            settings,
            analyze: None,
            executor_start: None,
            gate_config: None,
        }
    }

    pub fn connect(&self, database: &str) -> Backend {
        Backend::connect(Arc::clone(&self.shared), database)
    }

    pub fn module(&self) -> &Arc<ReadOnlyModule> {
        &self.module
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.shared.hooks
    }

    pub fn procs(&self) -> &Arc<ProcArray> {
        &self.shared.procs
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.shared.functions
    }

    /// Re-runs shared-memory startup as after a crash of a child process.
    /// The stored mode survives.
    pub fn restart_subsystems(&self) -> Result<(), GateError> {
        info!("reinitializing shared memory subsystems");
        self.module.shmem_startup(&self.shared.shmem)
    }

    /// Unloads the module, putting back whatever handlers and functions it
    /// displaced.
    pub fn shutdown(&self) {
        self.module.unload();
        info!("cluster shut down");
    }

    /// Committed row count of `table`.
    pub fn table_rows(&self, table: &str) -> Option<u64> {
        self.shared.storage.rows(table)
    }
}

use super::{GET_READONLY, HostContext, ReadOnlyModule, SET_READONLY, UNSET_READONLY};
use crate::classify::{CommandKind, ParsedStatement};
use crate::config::{Enablement, GateConfig, PRELOAD_OPTION};
use crate::error::{GateError, GateErrorCode};
use crate::hooks::{AnalyzeHook, FunctionRegistry, HookRegistry, QueryDesc};
use crate::host::Settings;
use crate::procarray::{BackendId, ProcArray, TransactionDirectory};
use crate::shmem::ShmemRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Host {
    settings: Settings,
    hooks: Arc<HookRegistry>,
    shmem: ShmemRegistry,
    procs: Arc<ProcArray>,
    functions: Arc<FunctionRegistry>,
}

impl Host {
    fn new(preload: Option<&str>) -> Self {
        let mut settings = Settings::new();
        if let Some(list) = preload {
            settings.set(PRELOAD_OPTION, list);
        }
        Self {
            settings,
            hooks: Arc::new(HookRegistry::default()),
            shmem: ShmemRegistry::new(),
            procs: Arc::new(ProcArray::new()),
            functions: Arc::new(FunctionRegistry::default()),
        }
    }

    fn load(&self) -> Arc<ReadOnlyModule> {
        let transactions: Arc<dyn TransactionDirectory> = self.procs.clone();
        let module = ReadOnlyModule::load(
            HostContext {
                settings: &self.settings,
                hooks: &self.hooks,
                shmem: &self.shmem,
                transactions,
                functions: &self.functions,
            },
            GateConfig::from_settings(&self.settings),
        );
        module.shmem_startup(&self.shmem).expect("shmem startup");
        module
    }
}

#[derive(Default)]
struct CountingAnalyze {
    calls: AtomicUsize,
}

impl AnalyzeHook for CountingAnalyze {
    fn post_parse_analyze(&self, _stmt: &ParsedStatement) -> Result<(), GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn insert() -> ParsedStatement {
    ParsedStatement::new(CommandKind::Insert, "INSERT INTO t VALUES (1)")
}

fn planned_insert() -> QueryDesc {
    QueryDesc {
        backend: BackendId(1),
        command: CommandKind::Insert,
        source_text: "INSERT INTO t VALUES (1)".into(),
    }
}

#[test]
fn load_registers_functions_and_starts_read_write() {
    let host = Host::new(Some("rogate"));
    let module = host.load();
    assert!(module.is_enabled());
    assert_eq!(
        host.functions.names(),
        vec![GET_READONLY, SET_READONLY, UNSET_READONLY]
    );
    assert_eq!(host.functions.call(GET_READONLY).expect("get"), "f");
    host.hooks.run_post_parse_analyze(&insert()).expect("read-write");

    assert_eq!(host.functions.call(SET_READONLY).expect("set"), "t");
    assert_eq!(host.functions.call(GET_READONLY).expect("get"), "t");
    let err = host
        .hooks
        .run_post_parse_analyze(&insert())
        .expect_err("read-only");
    assert!(err.is_rejected_by_policy());
    let err = host
        .hooks
        .run_executor_start(&planned_insert())
        .expect_err("read-only");
    assert!(err.is_rejected_by_policy());

    host.functions.call(UNSET_READONLY).expect("unset");
    host.hooks.run_post_parse_analyze(&insert()).expect("read-write again");
}

#[test]
fn shmem_startup_twice_keeps_the_mode() {
    let host = Host::new(Some("rogate"));
    let module = host.load();
    module.control().set_readonly().expect("set");
    module.shmem_startup(&host.shmem).expect("restart");
    assert!(module.control().get_readonly().expect("get"));
}

#[test]
fn modules_loaded_into_one_host_share_the_flag() {
    let host = Host::new(Some("rogate"));
    let first = host.load();
    let second = host.load();
    first.control().set_readonly().expect("set");
    assert!(second.control().get_readonly().expect("get"));

    // The second load displaced the first module's functions; they come back.
    second.unload();
    host.functions.call(UNSET_READONLY).expect("first module's unset");
    assert!(!first.control().get_readonly().expect("get"));
    first.unload();
    assert!(host.functions.names().is_empty());
}

#[test]
fn unload_unregisters_mode_functions() {
    let host = Host::new(Some("rogate"));
    let module = host.load();
    module.unload();
    for name in [SET_READONLY, UNSET_READONLY, GET_READONLY] {
        let err = host.functions.call(name).expect_err("unregistered");
        assert_eq!(err.code(), GateErrorCode::UnknownFunction);
    }
    assert!(module.control().get_readonly().is_ok());
}

#[test]
fn unload_keeps_a_function_registered_over_ours() {
    let host = Host::new(Some("rogate"));
    let module = host.load();
    host.functions
        .register(GET_READONLY, Arc::new(|| Ok("replacement".to_string())));
    module.unload();
    assert_eq!(host.functions.call(GET_READONLY).expect("kept"), "replacement");
    assert!(host.functions.call(SET_READONLY).is_err());
}

#[test]
fn not_listed_module_is_inert() {
    let host = Host::new(Some("pg_stat_statements"));
    let module = host.load();
    assert_eq!(module.state().enablement(), Enablement::NotListed);
    assert!(!host.shmem.is_requested("rogate"));
    host.hooks.run_post_parse_analyze(&insert()).expect("passes");
    host.hooks.run_executor_start(&planned_insert()).expect("passes");
    let err = host.functions.call(GET_READONLY).expect_err("disabled");
    assert_eq!(err.code(), GateErrorCode::ModuleNotEnabled);
}

#[test]
fn missing_preload_option_disables_module() {
    let host = Host::new(None);
    let module = host.load();
    assert_eq!(module.state().enablement(), Enablement::OptionMissing);
    let err = module.control().set_readonly().expect_err("disabled");
    assert_eq!(err.code(), GateErrorCode::ModuleNotEnabled);
}

#[test]
fn unload_restores_displaced_handlers() {
    let host = Host::new(Some("rogate"));
    let existing = Arc::new(CountingAnalyze::default());
    host.hooks.set_analyze(Some(existing.clone()));

    let module = host.load();
    host.hooks.run_post_parse_analyze(&insert()).expect("chained");
    assert_eq!(existing.calls.load(Ordering::SeqCst), 1);

    module.unload();
    let restored = host.hooks.analyze_hook().expect("restored");
    let expected: Arc<dyn AnalyzeHook> = existing.clone();
    assert!(Arc::ptr_eq(&restored, &expected));
    assert!(host.hooks.executor_start_hook().is_none());

    module.unload();
    assert!(host.hooks.analyze_hook().is_some());
}

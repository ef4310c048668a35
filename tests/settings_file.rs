use rogate::config::Enablement;
use rogate::error::GateErrorCode;
use rogate::host::{Cluster, Settings};
use std::fs;
use tempfile::tempdir;

fn boot(conf: &str) -> Cluster {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("server.conf");
    fs::write(&path, conf).expect("write conf");
    let settings = Settings::load(&path).expect("load settings");
    Cluster::builder(settings).start().expect("start")
}

#[test]
fn preload_entry_with_path_and_extension_enables_module() {
    let cluster = boot(
        "# libraries\n\
         shared_preload_libraries = '$libdir/pg_stat_statements, $libdir/rogate.so'\n",
    );
    assert_eq!(cluster.module().state().enablement(), Enablement::Enabled);
    assert!(cluster.module().state().config().cancel_on_engage);
}

#[test]
fn module_option_turns_off_cancellation() {
    let cluster = boot(
        "shared_preload_libraries = 'rogate'\n\
         rogate.cancel_on_engage = off\n",
    );
    let mut writer = cluster.connect("app");
    writer.execute("CREATE TABLE t (id int)").expect("create");
    writer.execute("BEGIN").expect("begin");
    writer.execute("INSERT INTO t VALUES (1)").expect("insert");

    let report = cluster.module().control().engage().expect("engage");
    assert_eq!(report.targeted, 0);
    // The open transaction keeps its writes but cannot add more.
    let err = writer
        .execute("INSERT INTO t VALUES (2)")
        .expect_err("rejected");
    assert!(err.is_rejected_by_policy());
}

#[test]
fn conf_without_preload_option_leaves_module_disabled() {
    let cluster = boot("max_connections = 10\n");
    assert_eq!(
        cluster.module().state().enablement(),
        Enablement::OptionMissing
    );
    let err = cluster
        .module()
        .control()
        .get_readonly()
        .expect_err("disabled");
    assert_eq!(err.code(), GateErrorCode::ModuleNotEnabled);
}

#[test]
fn missing_conf_file_is_an_io_error() {
    let dir = tempdir().expect("temp dir");
    let err = Settings::load(&dir.path().join("absent.conf")).expect_err("missing");
    assert_eq!(err.code(), GateErrorCode::Io);
}

use super::Shared;
use super::parse::{Action, SelectTarget, Statement, parse};
use crate::error::GateError;
use crate::hooks::QueryDesc;
use crate::procarray::BackendId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    InProgress,
    /// A statement failed inside a block; only block exits are accepted.
    Failed,
}

/// Result of one statement, in the shape a wire protocol would report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub tag: String,
    pub rows: u64,
    pub value: Option<String>,
}

impl Outcome {
    fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            rows: 0,
            value: None,
        }
    }

    fn value(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            rows: 1,
            value: Some(value.into()),
        }
    }
}

/// One client connection. Registered in the backend table for its whole
/// lifetime.
pub struct Backend {
    id: BackendId,
    database: String,
    shared: Arc<Shared>,
    txn: TxnState,
    /// Uncommitted table changes; `None` marks a dropped table.
    pending: BTreeMap<String, Option<u64>>,
    prepared: HashMap<String, Statement>,
    session: BTreeMap<String, String>,
}

impl Backend {
    pub(crate) fn connect(shared: Arc<Shared>, database: &str) -> Self {
        let id = shared.procs.register(database);
        debug!(backend = %id, database, "backend connected");
        Self {
            id,
            database: database.to_string(),
            shared,
            txn: TxnState::Idle,
            pending: BTreeMap::new(),
            prepared: HashMap::new(),
            session: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn txn_state(&self) -> TxnState {
        self.txn
    }

    /// Runs one statement. A failure inside a transaction block aborts the
    /// block; outside a block the statement's changes are discarded.
    pub fn execute(&mut self, sql: &str) -> Result<Outcome, GateError> {
        let result = self.run(sql);
        if let Err(err) = &result {
            debug!(backend = %self.id, error = %err, "statement failed");
            self.abort_statement();
        }
        result
    }

    fn run(&mut self, sql: &str) -> Result<Outcome, GateError> {
        self.shared.procs.check_for_interrupts(self.id)?;
        let stmt = parse(sql)?;
        // An empty query string is answered without analysis.
        if stmt.action == Action::Nothing {
            return Ok(Outcome::tag("EMPTY"));
        }
        if self.txn == TxnState::Failed && !stmt.action.ends_transaction_block() {
            return Err(GateError::TransactionAborted);
        }
        self.shared.hooks.run_post_parse_analyze(&stmt.parsed)?;

        let autocommit = self.txn == TxnState::Idle;
        let outcome = if stmt.action.is_plannable() {
            self.plan_and_run(&stmt)?
        } else {
            self.run_utility(stmt)?
        };
        if autocommit && self.txn == TxnState::Idle {
            self.commit_pending();
        }
        Ok(outcome)
    }

    fn plan_and_run(&mut self, stmt: &Statement) -> Result<Outcome, GateError> {
        self.start_executor(stmt)?;
        self.shared.procs.check_for_interrupts(self.id)?;
        self.run_plan(&stmt.action)
    }

    fn start_executor(&self, stmt: &Statement) -> Result<(), GateError> {
        let query = QueryDesc {
            backend: self.id,
            command: stmt.parsed.command,
            source_text: stmt.parsed.source_text.clone(),
        };
        self.shared.hooks.run_executor_start(&query)
    }

    fn run_plan(&mut self, action: &Action) -> Result<Outcome, GateError> {
        match action {
            Action::Select(SelectTarget::Constant) => Ok(Outcome {
                tag: "SELECT 1".into(),
                rows: 1,
                value: None,
            }),
            Action::Select(SelectTarget::Table(table)) => {
                let count = self.rows(table)?;
                Ok(Outcome::value("SELECT 1", count.to_string()))
            }
            Action::Select(SelectTarget::Function(name)) => {
                let value = self.shared.functions.call(name)?;
                Ok(Outcome::value("SELECT 1", value))
            }
            Action::Insert { table, rows } => {
                let count = self.rows(table)?;
                self.write(table, Some(count + rows))?;
                Ok(Outcome {
                    tag: format!("INSERT 0 {rows}"),
                    rows: *rows,
                    value: None,
                })
            }
            Action::Update { table } => {
                let count = self.rows(table)?;
                self.write(table, Some(count))?;
                Ok(Outcome {
                    tag: format!("UPDATE {count}"),
                    rows: count,
                    value: None,
                })
            }
            Action::Delete { table } => {
                let count = self.rows(table)?;
                self.write(table, Some(0))?;
                Ok(Outcome {
                    tag: format!("DELETE {count}"),
                    rows: count,
                    value: None,
                })
            }
            Action::Merge { table } => {
                let count = self.rows(table)?;
                self.write(table, Some(count))?;
                Ok(Outcome::tag("MERGE 0"))
            }
            other => Err(GateError::Handler(format!(
                "{other:?} cannot be planned"
            ))),
        }
    }

    fn run_utility(&mut self, stmt: Statement) -> Result<Outcome, GateError> {
        match stmt.action {
            Action::Explain(body) => {
                self.start_executor(&body)?;
                let plan = format!("{} plan", body.parsed.command);
                Ok(Outcome::value("EXPLAIN", plan))
            }
            Action::Set { name, value } => {
                match value {
                    Some(value) => self.session.insert(name, value),
                    None => self.session.remove(&name),
                };
                Ok(Outcome::tag("SET"))
            }
            Action::Show { name } => {
                let value = self
                    .session
                    .get(&name)
                    .cloned()
                    .or_else(|| self.shared.settings.get(&name).map(str::to_string))
                    .ok_or(GateError::InvalidSetting {
                        name,
                        value: String::new(),
                    })?;
                Ok(Outcome::value("SHOW", value))
            }
            Action::Prepare { name, body } => {
                // The body is analyzed on its own, as a nested statement.
                self.shared.hooks.run_post_parse_analyze(&body.parsed)?;
                if self.prepared.contains_key(&name) {
                    return Err(GateError::DuplicatePreparedStatement { name });
                }
                self.prepared.insert(name, *body);
                Ok(Outcome::tag("PREPARE"))
            }
            Action::Execute { name } => {
                let body = self
                    .prepared
                    .get(&name)
                    .cloned()
                    .ok_or(GateError::UnknownPreparedStatement { name })?;
                self.plan_and_run(&body)
            }
            Action::Deallocate { name: Some(name) } => {
                self.prepared
                    .remove(&name)
                    .ok_or(GateError::UnknownPreparedStatement { name })?;
                Ok(Outcome::tag("DEALLOCATE"))
            }
            Action::Deallocate { name: None } => {
                self.prepared.clear();
                Ok(Outcome::tag("DEALLOCATE ALL"))
            }
            Action::Begin => {
                if self.txn == TxnState::InProgress {
                    warn!(backend = %self.id, "there is already a transaction in progress");
                }
                self.txn = TxnState::InProgress;
                Ok(Outcome::tag("BEGIN"))
            }
            Action::Commit => match self.txn {
                TxnState::InProgress => {
                    self.commit_pending();
                    self.txn = TxnState::Idle;
                    Ok(Outcome::tag("COMMIT"))
                }
                TxnState::Failed => {
                    self.discard_pending();
                    self.txn = TxnState::Idle;
                    Ok(Outcome::tag("ROLLBACK"))
                }
                TxnState::Idle => {
                    warn!(backend = %self.id, "there is no transaction in progress");
                    Ok(Outcome::tag("COMMIT"))
                }
            },
            Action::Rollback => {
                if self.txn == TxnState::Idle {
                    warn!(backend = %self.id, "there is no transaction in progress");
                }
                self.discard_pending();
                self.txn = TxnState::Idle;
                Ok(Outcome::tag("ROLLBACK"))
            }
            Action::CreateTable { table } => {
                if self.lookup(&table).is_some() {
                    return Err(GateError::DuplicateTable { table });
                }
                self.write(&table, Some(0))?;
                Ok(Outcome::tag("CREATE TABLE"))
            }
            Action::DropTable { table } => {
                self.rows(&table)?;
                self.write(&table, None)?;
                Ok(Outcome::tag("DROP TABLE"))
            }
            Action::OtherUtility => {
                let keyword = stmt
                    .parsed
                    .source_text
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_ascii_uppercase();
                Ok(Outcome::tag(keyword))
            }
            other => Err(GateError::Handler(format!(
                "{other:?} is not a utility statement"
            ))),
        }
    }

    /// Row count as seen by this backend, including its own pending changes.
    fn lookup(&self, table: &str) -> Option<u64> {
        match self.pending.get(table) {
            Some(overlay) => *overlay,
            None => self.shared.storage.rows(table),
        }
    }

    fn rows(&self, table: &str) -> Result<u64, GateError> {
        self.lookup(table).ok_or_else(|| GateError::UnknownTable {
            table: table.to_string(),
        })
    }

    fn write(&mut self, table: &str, rows: Option<u64>) -> Result<(), GateError> {
        let xid = self.shared.procs.assign_xid(self.id)?;
        debug!(backend = %self.id, xid = xid.0, table, "pending write");
        self.pending.insert(table.to_string(), rows);
        Ok(())
    }

    fn commit_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.shared.storage.apply(pending);
        self.shared.procs.end_transaction(self.id);
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
        self.shared.procs.end_transaction(self.id);
    }

    fn abort_statement(&mut self) {
        match self.txn {
            TxnState::InProgress => {
                self.discard_pending();
                self.txn = TxnState::Failed;
            }
            TxnState::Idle => self.discard_pending(),
            TxnState::Failed => {}
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.shared.procs.unregister(self.id);
        debug!(backend = %self.id, "backend disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::TxnState;
    use crate::error::GateErrorCode;
    use crate::host::{Cluster, Settings};

    fn cluster() -> Cluster {
        Cluster::builder(Settings::new().with("shared_preload_libraries", "rogate"))
            .start()
            .expect("start")
    }

    #[test]
    fn autocommit_makes_writes_visible_to_other_backends() {
        let cluster = cluster();
        let mut a = cluster.connect("app");
        let mut b = cluster.connect("app");
        a.execute("CREATE TABLE t (id int)").expect("create");
        let out = a.execute("INSERT INTO t VALUES (1), (2)").expect("insert");
        assert_eq!(out.tag, "INSERT 0 2");
        let out = b.execute("SELECT count(*) FROM t").expect("count");
        assert_eq!(out.value.as_deref(), Some("2"));
        assert_eq!(cluster.table_rows("t"), Some(2));
    }

    #[test]
    fn block_changes_stay_private_until_commit() {
        let cluster = cluster();
        let mut a = cluster.connect("app");
        a.execute("CREATE TABLE t (id int)").expect("create");
        a.execute("BEGIN").expect("begin");
        a.execute("INSERT INTO t VALUES (1)").expect("insert");
        assert_eq!(cluster.table_rows("t"), Some(0));
        assert!(cluster.procs().current_xid(a.id()).is_some());
        a.execute("COMMIT").expect("commit");
        assert_eq!(cluster.table_rows("t"), Some(1));
        assert!(cluster.procs().current_xid(a.id()).is_none());
    }

    #[test]
    fn failed_statement_aborts_the_block() {
        let cluster = cluster();
        let mut a = cluster.connect("app");
        a.execute("BEGIN").expect("begin");
        let err = a.execute("INSERT INTO missing VALUES (1)").expect_err("no table");
        assert_eq!(err.code(), GateErrorCode::UnknownTable);
        assert_eq!(a.txn_state(), TxnState::Failed);

        let err = a.execute("SELECT 1").expect_err("aborted");
        assert_eq!(err.code(), GateErrorCode::TransactionAborted);
        let out = a.execute("COMMIT").expect("exit");
        assert_eq!(out.tag, "ROLLBACK");
        assert_eq!(a.txn_state(), TxnState::Idle);
        a.execute("SELECT 1").expect("usable again");
    }

    #[test]
    fn prepared_statements_and_session_settings() {
        let cluster = cluster();
        let mut a = cluster.connect("app");
        a.execute("CREATE TABLE t (id int)").expect("create");
        a.execute("PREPARE ins AS INSERT INTO t VALUES (1)").expect("prepare");
        let err = a
            .execute("PREPARE ins AS SELECT 1")
            .expect_err("duplicate");
        assert_eq!(err.code(), GateErrorCode::DuplicatePreparedStatement);
        a.execute("EXECUTE ins").expect("execute");
        a.execute("EXECUTE ins").expect("execute");
        assert_eq!(cluster.table_rows("t"), Some(2));
        a.execute("DEALLOCATE ins").expect("deallocate");
        let err = a.execute("EXECUTE ins").expect_err("gone");
        assert_eq!(err.code(), GateErrorCode::UnknownPreparedStatement);

        a.execute("SET search_path TO app").expect("set");
        let out = a.execute("SHOW search_path").expect("show");
        assert_eq!(out.value.as_deref(), Some("app"));
        let out = a.execute("SHOW shared_preload_libraries").expect("show");
        assert_eq!(out.value.as_deref(), Some("rogate"));
    }

    #[test]
    fn drop_table_is_transactional() {
        let cluster = cluster();
        let mut a = cluster.connect("app");
        a.execute("CREATE TABLE t (id int)").expect("create");
        a.execute("BEGIN").expect("begin");
        a.execute("DROP TABLE t").expect("drop");
        let err = a.execute("SELECT count(*) FROM t").expect_err("dropped");
        assert_eq!(err.code(), GateErrorCode::UnknownTable);
        a.execute("ROLLBACK").expect("rollback");
        assert_eq!(cluster.table_rows("t"), Some(0));
    }

    #[test]
    fn disconnect_leaves_the_backend_table() {
        let cluster = cluster();
        let a = cluster.connect("app");
        assert_eq!(cluster.procs().backend_count(), 1);
        drop(a);
        assert_eq!(cluster.procs().backend_count(), 0);
    }
}

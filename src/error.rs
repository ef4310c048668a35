use crate::hooks::Checkpoint;
use crate::procarray::{BackendId, TransactionId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateErrorCode {
    RejectedByPolicy,
    ModuleNotEnabled,
    ConfigurationMissing,
    SharedMemory,
    QueryCanceled,
    TransactionAborted,
    Syntax,
    UnknownPreparedStatement,
    DuplicatePreparedStatement,
    UnknownTable,
    DuplicateTable,
    UnknownFunction,
    UnknownBackend,
    TransactionEnded,
    InvalidSetting,
    Handler,
    Io,
}

impl GateErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GateErrorCode::RejectedByPolicy => "rejected_by_policy",
            GateErrorCode::ModuleNotEnabled => "module_not_enabled",
            GateErrorCode::ConfigurationMissing => "configuration_missing",
            GateErrorCode::SharedMemory => "shared_memory",
            GateErrorCode::QueryCanceled => "query_canceled",
            GateErrorCode::TransactionAborted => "transaction_aborted",
            GateErrorCode::Syntax => "syntax",
            GateErrorCode::UnknownPreparedStatement => "unknown_prepared_statement",
            GateErrorCode::DuplicatePreparedStatement => "duplicate_prepared_statement",
            GateErrorCode::UnknownTable => "unknown_table",
            GateErrorCode::DuplicateTable => "duplicate_table",
            GateErrorCode::UnknownFunction => "unknown_function",
            GateErrorCode::UnknownBackend => "unknown_backend",
            GateErrorCode::TransactionEnded => "transaction_ended",
            GateErrorCode::InvalidSetting => "invalid_setting",
            GateErrorCode::Handler => "handler",
            GateErrorCode::Io => "io",
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid statement because cluster is read-only ({checkpoint} checkpoint, command {command})")]
    RejectedByPolicy {
        checkpoint: Checkpoint,
        command: &'static str,
    },
    #[error("read-only gate is not enabled: '{module}' is not listed in {option}")]
    ModuleNotEnabled { module: String, option: String },
    #[error("configuration option '{option}' is not set")]
    ConfigurationMissing { option: String },
    #[error("shared memory error: {message}")]
    SharedMemory { message: String },
    #[error("canceling statement due to user request (backend {backend})")]
    QueryCanceled { backend: BackendId },
    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    TransactionAborted,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("prepared statement '{name}' does not exist")]
    UnknownPreparedStatement { name: String },
    #[error("prepared statement '{name}' already exists")]
    DuplicatePreparedStatement { name: String },
    #[error("relation '{table}' does not exist")]
    UnknownTable { table: String },
    #[error("relation '{table}' already exists")]
    DuplicateTable { table: String },
    #[error("function {name}() does not exist")]
    UnknownFunction { name: String },
    #[error("backend {0} not found")]
    UnknownBackend(BackendId),
    #[error("transaction {xid} on backend {backend} has already ended")]
    TransactionEnded {
        backend: BackendId,
        xid: TransactionId,
    },
    #[error("invalid value for setting '{name}': '{value}'")]
    InvalidSetting { name: String, value: String },
    #[error("handler error: {0}")]
    Handler(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    pub fn code(&self) -> GateErrorCode {
        match self {
            GateError::RejectedByPolicy { .. } => GateErrorCode::RejectedByPolicy,
            GateError::ModuleNotEnabled { .. } => GateErrorCode::ModuleNotEnabled,
            GateError::ConfigurationMissing { .. } => GateErrorCode::ConfigurationMissing,
            GateError::SharedMemory { .. } => GateErrorCode::SharedMemory,
            GateError::QueryCanceled { .. } => GateErrorCode::QueryCanceled,
            GateError::TransactionAborted => GateErrorCode::TransactionAborted,
            GateError::Syntax(_) => GateErrorCode::Syntax,
            GateError::UnknownPreparedStatement { .. } => GateErrorCode::UnknownPreparedStatement,
            GateError::DuplicatePreparedStatement { .. } => {
                GateErrorCode::DuplicatePreparedStatement
            }
            GateError::UnknownTable { .. } => GateErrorCode::UnknownTable,
            GateError::DuplicateTable { .. } => GateErrorCode::DuplicateTable,
            GateError::UnknownFunction { .. } => GateErrorCode::UnknownFunction,
            GateError::UnknownBackend(_) => GateErrorCode::UnknownBackend,
            GateError::TransactionEnded { .. } => GateErrorCode::TransactionEnded,
            GateError::InvalidSetting { .. } => GateErrorCode::InvalidSetting,
            GateError::Handler(_) => GateErrorCode::Handler,
            GateError::Io(_) => GateErrorCode::Io,
        }
    }

    pub fn is_rejected_by_policy(&self) -> bool {
        matches!(self, GateError::RejectedByPolicy { .. })
    }

    pub(crate) fn shmem(message: impl Into<String>) -> Self {
        GateError::SharedMemory {
            message: message.into(),
        }
    }
}

//! Statement classification.
//!
//! Two rulesets are applied at different pipeline stages. The analysis
//! ruleset sees the parse-analysis result and understands utility statements.
//! The planned ruleset only sees the command kind of a plan that is about to
//! run and accepts nothing but `Select`.

use std::fmt;
use tracing::debug;

/// Command kind attached to an analyzed statement or a planned query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Nothing,
    Select,
    Insert,
    Update,
    Delete,
    Utility,
    /// A command kind the classifier has no rule for.
    Unknown,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Nothing => "NOTHING",
            CommandKind::Select => "SELECT",
            CommandKind::Insert => "INSERT",
            CommandKind::Update => "UPDATE",
            CommandKind::Delete => "DELETE",
            CommandKind::Utility => "UTILITY",
            CommandKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-kind of a `CommandKind::Utility` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtilityKind {
    Explain,
    VariableSet,
    VariableShow,
    Prepare,
    Execute,
    Deallocate,
    Other,
}

impl UtilityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UtilityKind::Explain => "EXPLAIN",
            UtilityKind::VariableSet => "SET",
            UtilityKind::VariableShow => "SHOW",
            UtilityKind::Prepare => "PREPARE",
            UtilityKind::Execute => "EXECUTE",
            UtilityKind::Deallocate => "DEALLOC",
            UtilityKind::Other => "OTHER",
        }
    }

    fn is_read_only(self) -> bool {
        !matches!(self, UtilityKind::Other)
    }
}

/// Result of parse analysis as handed to the analysis checkpoint.
///
/// Produced once per statement by the host and dropped after the verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub command: CommandKind,
    /// Only meaningful when `command` is `Utility`. A utility statement
    /// without a sub-kind is classified as `Other`.
    pub utility: Option<UtilityKind>,
    pub source_text: String,
}

impl ParsedStatement {
    pub fn new(command: CommandKind, source_text: impl Into<String>) -> Self {
        Self {
            command,
            utility: None,
            source_text: source_text.into(),
        }
    }

    pub fn utility(kind: UtilityKind, source_text: impl Into<String>) -> Self {
        Self {
            command: CommandKind::Utility,
            utility: Some(kind),
            source_text: source_text.into(),
        }
    }

    pub fn utility_kind(&self) -> Option<UtilityKind> {
        match self.command {
            CommandKind::Utility => Some(self.utility.unwrap_or(UtilityKind::Other)),
            _ => None,
        }
    }
}

/// Full ruleset used at the analysis checkpoint.
pub fn classify_analyzed(stmt: &ParsedStatement) -> bool {
    let command_is_ro = match stmt.utility_kind() {
        // A client whose write transaction was cancelled by engagement must
        // still be able to close it.
        Some(_) if mentions_rollback(&stmt.source_text) => true,
        Some(kind) => kind.is_read_only(),
        None => matches!(stmt.command, CommandKind::Select),
    };
    debug!(
        command = stmt.command.as_str(),
        utility = stmt.utility_kind().map(UtilityKind::as_str),
        command_is_ro,
        "classified analyzed statement"
    );
    command_is_ro
}

/// Coarse ruleset used at the execution checkpoint.
pub fn classify_planned(command: CommandKind) -> bool {
    let command_is_ro = matches!(command, CommandKind::Select);
    debug!(
        command = command.as_str(),
        command_is_ro, "classified planned statement"
    );
    command_is_ro
}

/// Case-insensitive search for `rollback` in the statement text.
pub fn mentions_rollback(source_text: &str) -> bool {
    const NEEDLE: &[u8] = b"rollback";
    source_text
        .as_bytes()
        .windows(NEEDLE.len())
        .any(|window| window.eq_ignore_ascii_case(NEEDLE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utility(kind: UtilityKind, text: &str) -> ParsedStatement {
        ParsedStatement::utility(kind, text)
    }

    #[test]
    fn plain_commands() {
        assert!(classify_analyzed(&ParsedStatement::new(
            CommandKind::Select,
            "SELECT 1"
        )));
        for command in [CommandKind::Insert, CommandKind::Update, CommandKind::Delete] {
            assert!(!classify_analyzed(&ParsedStatement::new(command, "x")));
        }
    }

    #[test]
    fn unknown_and_nothing_fail_closed() {
        assert!(!classify_analyzed(&ParsedStatement::new(
            CommandKind::Unknown,
            "MERGE INTO t"
        )));
        assert!(!classify_analyzed(&ParsedStatement::new(
            CommandKind::Nothing,
            ""
        )));
    }

    #[test]
    fn utility_sub_kinds() {
        for kind in [
            UtilityKind::Explain,
            UtilityKind::VariableSet,
            UtilityKind::VariableShow,
            UtilityKind::Prepare,
            UtilityKind::Execute,
            UtilityKind::Deallocate,
        ] {
            assert!(classify_analyzed(&utility(kind, "stmt")), "{kind:?}");
        }
        assert!(!classify_analyzed(&utility(UtilityKind::Other, "CREATE TABLE t")));
        let bare = ParsedStatement::new(CommandKind::Utility, "VACUUM");
        assert!(!classify_analyzed(&bare));
    }

    #[test]
    fn rollback_escape_hatch_ignores_case_and_sub_kind() {
        assert!(classify_analyzed(&utility(UtilityKind::Other, "ROLLBACK")));
        assert!(classify_analyzed(&utility(UtilityKind::Other, "rollback;")));
        assert!(classify_analyzed(&utility(
            UtilityKind::Other,
            "ROLLBACK TO SAVEPOINT s1"
        )));
        assert!(classify_analyzed(&utility(UtilityKind::Other, "RoLlBaCk")));
    }

    #[test]
    fn rollback_text_does_not_rescue_plain_writes() {
        let stmt = ParsedStatement::new(CommandKind::Insert, "INSERT INTO rollback_log VALUES (1)");
        assert!(!classify_analyzed(&stmt));
    }

    #[test]
    fn planned_rule_only_accepts_select() {
        assert!(classify_planned(CommandKind::Select));
        for command in [
            CommandKind::Insert,
            CommandKind::Update,
            CommandKind::Delete,
            CommandKind::Utility,
            CommandKind::Nothing,
            CommandKind::Unknown,
        ] {
            assert!(!classify_planned(command), "{command:?}");
        }
    }

    #[test]
    fn rollback_search_handles_short_and_non_ascii_text() {
        assert!(!mentions_rollback(""));
        assert!(!mentions_rollback("roll"));
        assert!(mentions_rollback("-- é\nROLLBACK"));
    }
}

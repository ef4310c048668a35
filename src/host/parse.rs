//! Keyword-level statement recognizer for the reference host.
//!
//! Produces the same analysis result a full parser would hand to the
//! analysis slot, plus enough detail for the host to run the statement.

use crate::classify::{CommandKind, ParsedStatement, UtilityKind};
use crate::error::GateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectTarget {
    Constant,
    Table(String),
    Function(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Nothing,
    Select(SelectTarget),
    Insert { table: String, rows: u64 },
    Update { table: String },
    Delete { table: String },
    Merge { table: String },
    Explain(Box<Statement>),
    Set { name: String, value: Option<String> },
    Show { name: String },
    Prepare { name: String, body: Box<Statement> },
    Execute { name: String },
    Deallocate { name: Option<String> },
    Begin,
    Commit,
    Rollback,
    CreateTable { table: String },
    DropTable { table: String },
    OtherUtility,
}

impl Action {
    /// Statements that go through the executor rather than utility
    /// processing.
    pub fn is_plannable(&self) -> bool {
        matches!(
            self,
            Action::Select(_)
                | Action::Insert { .. }
                | Action::Update { .. }
                | Action::Delete { .. }
                | Action::Merge { .. }
        )
    }

    pub fn ends_transaction_block(&self) -> bool {
        matches!(self, Action::Commit | Action::Rollback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub parsed: ParsedStatement,
    pub action: Action,
}

impl Statement {
    fn plain(command: CommandKind, text: &str, action: Action) -> Self {
        Self {
            parsed: ParsedStatement::new(command, text),
            action,
        }
    }

    fn utility(kind: UtilityKind, text: &str, action: Action) -> Self {
        Self {
            parsed: ParsedStatement::utility(kind, text),
            action,
        }
    }
}

pub fn parse(sql: &str) -> Result<Statement, GateError> {
    let text = sql.trim().trim_end_matches(';').trim_end();
    let words: Vec<&str> = text.split_whitespace().collect();
    let Some(first) = words.first() else {
        return Ok(Statement::plain(CommandKind::Nothing, text, Action::Nothing));
    };
    let keyword = first.to_ascii_uppercase();
    let stmt = match keyword.as_str() {
        "SELECT" | "VALUES" | "TABLE" => Statement::plain(
            CommandKind::Select,
            text,
            Action::Select(select_target(&words)),
        ),
        "INSERT" => {
            expect_word(&words, 1, "INTO")?;
            let table = table_name(&words, 2)?;
            Statement::plain(
                CommandKind::Insert,
                text,
                Action::Insert {
                    table,
                    rows: count_value_rows(text)?,
                },
            )
        }
        "UPDATE" => Statement::plain(
            CommandKind::Update,
            text,
            Action::Update {
                table: table_name(&words, 1)?,
            },
        ),
        "DELETE" => {
            expect_word(&words, 1, "FROM")?;
            Statement::plain(
                CommandKind::Delete,
                text,
                Action::Delete {
                    table: table_name(&words, 2)?,
                },
            )
        }
        // Not covered by any classifier rule.
        "MERGE" => {
            expect_word(&words, 1, "INTO")?;
            Statement::plain(
                CommandKind::Unknown,
                text,
                Action::Merge {
                    table: table_name(&words, 2)?,
                },
            )
        }
        "EXPLAIN" => {
            let inner = rest_after(text, 1);
            let inner = strip_keyword(inner, "ANALYZE").unwrap_or(inner);
            let body = parse(inner)?;
            if !body.action.is_plannable() {
                return Err(GateError::Syntax(format!(
                    "cannot explain a {} statement",
                    body.parsed.command
                )));
            }
            Statement::utility(UtilityKind::Explain, text, Action::Explain(Box::new(body)))
        }
        "SET" | "RESET" => Statement::utility(UtilityKind::VariableSet, text, set_action(&words)?),
        "SHOW" => Statement::utility(
            UtilityKind::VariableShow,
            text,
            Action::Show {
                name: word(&words, 1)?.to_ascii_lowercase(),
            },
        ),
        "PREPARE" => {
            let name = identifier(word(&words, 1)?);
            expect_word(&words, 2, "AS")?;
            let body = parse(rest_after(text, 3))?;
            if !body.action.is_plannable() {
                return Err(GateError::Syntax(format!(
                    "cannot prepare a {} statement",
                    body.parsed.command
                )));
            }
            Statement::utility(
                UtilityKind::Prepare,
                text,
                Action::Prepare {
                    name,
                    body: Box::new(body),
                },
            )
        }
        "EXECUTE" => Statement::utility(
            UtilityKind::Execute,
            text,
            Action::Execute {
                name: identifier(word(&words, 1)?),
            },
        ),
        "DEALLOCATE" => {
            let mut target = word(&words, 1)?;
            if target.eq_ignore_ascii_case("PREPARE") {
                target = word(&words, 2)?;
            }
            let name = (!target.eq_ignore_ascii_case("ALL")).then(|| identifier(target));
            Statement::utility(UtilityKind::Deallocate, text, Action::Deallocate { name })
        }
        "BEGIN" | "START" => Statement::utility(UtilityKind::Other, text, Action::Begin),
        "COMMIT" | "END" => Statement::utility(UtilityKind::Other, text, Action::Commit),
        "ROLLBACK" | "ABORT" => Statement::utility(UtilityKind::Other, text, Action::Rollback),
        "CREATE" if word_is(&words, 1, "TABLE") => {
            let at = if word_is(&words, 2, "IF") { 5 } else { 2 };
            Statement::utility(
                UtilityKind::Other,
                text,
                Action::CreateTable {
                    table: table_name(&words, at)?,
                },
            )
        }
        "DROP" if word_is(&words, 1, "TABLE") => {
            let at = if word_is(&words, 2, "IF") { 4 } else { 2 };
            Statement::utility(
                UtilityKind::Other,
                text,
                Action::DropTable {
                    table: table_name(&words, at)?,
                },
            )
        }
        "CREATE" | "DROP" | "ALTER" | "TRUNCATE" | "VACUUM" | "ANALYZE" | "GRANT" | "REVOKE"
        | "COPY" | "COMMENT" | "REINDEX" | "CLUSTER" | "LOCK" | "CHECKPOINT" | "LISTEN"
        | "NOTIFY" | "DISCARD" | "SAVEPOINT" | "RELEASE" => {
            Statement::utility(UtilityKind::Other, text, Action::OtherUtility)
        }
        _ => {
            return Err(GateError::Syntax(format!(
                "unrecognized statement at or near \"{first}\""
            )));
        }
    };
    Ok(stmt)
}

fn word<'a>(words: &[&'a str], at: usize) -> Result<&'a str, GateError> {
    words
        .get(at)
        .copied()
        .ok_or_else(|| GateError::Syntax("unexpected end of statement".into()))
}

fn word_is(words: &[&str], at: usize, expected: &str) -> bool {
    words
        .get(at)
        .is_some_and(|w| w.eq_ignore_ascii_case(expected))
}

fn expect_word(words: &[&str], at: usize, expected: &str) -> Result<(), GateError> {
    if word_is(words, at, expected) {
        return Ok(());
    }
    Err(GateError::Syntax(format!("expected {expected}")))
}

fn identifier(raw: &str) -> String {
    raw.split('(')
        .next()
        .unwrap_or(raw)
        .trim_matches('"')
        .to_ascii_lowercase()
}

fn table_name(words: &[&str], at: usize) -> Result<String, GateError> {
    let name = identifier(word(words, at)?);
    if name.is_empty() {
        return Err(GateError::Syntax("missing relation name".into()));
    }
    Ok(name)
}

/// Text following the first `skip` whitespace-separated words.
fn rest_after(text: &str, skip: usize) -> &str {
    let mut rest = text.trim_start();
    for _ in 0..skip {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let tail = &text[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && tail.starts_with(char::is_whitespace))
        .then(|| tail.trim_start())
}

fn select_target(words: &[&str]) -> SelectTarget {
    if let Some(pos) = words.iter().position(|w| w.eq_ignore_ascii_case("FROM")) {
        if let Some(table) = words.get(pos + 1) {
            return SelectTarget::Table(identifier(table));
        }
    }
    match words.get(1) {
        Some(item) if item.ends_with("()") && words.len() == 2 => {
            SelectTarget::Function(identifier(item))
        }
        _ => SelectTarget::Constant,
    }
}

fn set_action(words: &[&str]) -> Result<Action, GateError> {
    if words[0].eq_ignore_ascii_case("RESET") {
        return Ok(Action::Set {
            name: word(words, 1)?.to_ascii_lowercase(),
            value: None,
        });
    }
    let mut name = word(words, 1)?;
    if name.eq_ignore_ascii_case("SESSION") || name.eq_ignore_ascii_case("LOCAL") {
        name = word(words, 2)?;
    }
    let (name, inline) = match name.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (name, None),
    };
    let value = match inline.filter(|v| !v.is_empty()) {
        Some(value) => value.to_string(),
        None => {
            let pos = words
                .iter()
                .position(|w| w.eq_ignore_ascii_case("TO") || w.starts_with('='))
                .ok_or_else(|| GateError::Syntax("expected TO or =".into()))?;
            let head = words[pos].trim_start_matches('=');
            let tail = words[pos + 1..].join(" ");
            match (head.is_empty() || words[pos].eq_ignore_ascii_case("TO"), tail.is_empty()) {
                (true, true) => return Err(GateError::Syntax("missing value".into())),
                (true, false) => tail,
                (false, _) => head.to_string(),
            }
        }
    };
    Ok(Action::Set {
        name: name.to_ascii_lowercase(),
        value: Some(value.trim_matches('\'').to_string()),
    })
}

/// Counts the parenthesized row groups after `VALUES`.
fn count_value_rows(text: &str) -> Result<u64, GateError> {
    let upper = text.to_ascii_uppercase();
    let start = upper
        .find("VALUES")
        .ok_or_else(|| GateError::Syntax("INSERT requires a VALUES list".into()))?;
    let mut depth = 0usize;
    let mut rows = 0u64;
    for c in text[start..].chars() {
        match c {
            '(' => {
                if depth == 0 {
                    rows += 1;
                }
                depth += 1;
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    if rows == 0 {
        return Err(GateError::Syntax("empty VALUES list".into()));
    }
    Ok(rows)
}

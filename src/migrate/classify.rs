//! DDL Statement Classifier
//!
//! Splits the "up" SQL of a migration into statements and tags each one with
//! the schema operation it performs. This is pattern matching on statement
//! heads, not SQL parsing: a statement that matches none of the patterns is
//! tagged [`Operation::Other`] and replay ignores it.
//!
//! The splitter does understand enough lexical structure to keep
//! `;` inside string literals, quoted identifiers, comments and dollar-quoted
//! bodies from ending a statement, so `CREATE FUNCTION ... $$ ... $$`
//! survives as one statement.
//!
//! `CREATE INDEX` takes its `unique` and `concurrent` flags from the
//! statement head (`CREATE UNIQUE INDEX CONCURRENTLY`) rather than from a
//! substring search of the whole statement, so a partial-index predicate
//! such as `WHERE kind = 'unique'` does not mark the index unique. Indexes
//! are diffed by key, so the flags never affect drift.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::ident::{ObjectName, parse_identifier, parse_object_name, parse_object_names};
use crate::schema::ConstraintKind;

/// Fieldless tag for an [`Operation`], for reporting and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AddConstraint,
    DropConstraint,
    RenameTable,
    RenameColumn,
    CreateIndex,
    DropIndex,
    CreateView,
    DropView,
    CreateTrigger,
    DropTrigger,
    CreatePolicy,
    DropPolicy,
    Other,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A schema operation extracted from one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateTable {
        table: ObjectName,
    },
    DropTable {
        tables: Vec<ObjectName>,
    },
    AddColumn {
        table: ObjectName,
        column: String,
    },
    DropColumn {
        table: ObjectName,
        column: String,
    },
    AddConstraint {
        table: ObjectName,
        constraint: String,
        kind: ConstraintKind,
    },
    DropConstraint {
        table: ObjectName,
        constraint: String,
    },
    RenameTable {
        table: ObjectName,
        to: String,
    },
    RenameColumn {
        table: ObjectName,
        from: String,
        to: String,
    },
    /// The index lives in its table's schema.
    CreateIndex {
        name: String,
        table: ObjectName,
        unique: bool,
        concurrent: bool,
    },
    DropIndex {
        indexes: Vec<ObjectName>,
    },
    CreateView {
        view: ObjectName,
        materialized: bool,
    },
    DropView {
        views: Vec<ObjectName>,
    },
    CreateTrigger {
        name: String,
        table: ObjectName,
    },
    DropTrigger {
        name: String,
        table: ObjectName,
    },
    CreatePolicy {
        name: String,
        table: ObjectName,
    },
    DropPolicy {
        name: String,
        table: ObjectName,
    },
    Other,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateTable { .. } => OperationKind::CreateTable,
            Self::DropTable { .. } => OperationKind::DropTable,
            Self::AddColumn { .. } => OperationKind::AddColumn,
            Self::DropColumn { .. } => OperationKind::DropColumn,
            Self::AddConstraint { .. } => OperationKind::AddConstraint,
            Self::DropConstraint { .. } => OperationKind::DropConstraint,
            Self::RenameTable { .. } => OperationKind::RenameTable,
            Self::RenameColumn { .. } => OperationKind::RenameColumn,
            Self::CreateIndex { .. } => OperationKind::CreateIndex,
            Self::DropIndex { .. } => OperationKind::DropIndex,
            Self::CreateView { .. } => OperationKind::CreateView,
            Self::DropView { .. } => OperationKind::DropView,
            Self::CreateTrigger { .. } => OperationKind::CreateTrigger,
            Self::DropTrigger { .. } => OperationKind::DropTrigger,
            Self::CreatePolicy { .. } => OperationKind::CreatePolicy,
            Self::DropPolicy { .. } => OperationKind::DropPolicy,
            Self::Other => OperationKind::Other,
        }
    }

    /// The table this operation is about or hangs off, if any.
    pub fn parent_table(&self) -> Option<&ObjectName> {
        match self {
            Self::CreateTable { table }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::DropConstraint { table, .. }
            | Self::RenameTable { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::CreateTrigger { table, .. }
            | Self::DropTrigger { table, .. }
            | Self::CreatePolicy { table, .. }
            | Self::DropPolicy { table, .. } => Some(table),
            Self::DropTable { .. }
            | Self::DropIndex { .. }
            | Self::CreateView { .. }
            | Self::DropView { .. }
            | Self::Other => None,
        }
    }
}

/// One classified operation plus the statement it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOperation {
    pub statement: String,
    pub operation: Operation,
}

impl ParsedOperation {
    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^CREATE\s+(?:(?:GLOBAL|LOCAL)\s+)?(?:(?:TEMP|TEMPORARY|UNLOGGED)\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?",
    )
});
static DROP_TABLE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^DROP\s+TABLE\s+(?:IF\s+EXISTS\s+)?"));
static ALTER_TABLE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?"));
static ADD_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^ADD\s+COLUMN\s+(?:IF\s+NOT\s+EXISTS\s+)?"));
static DROP_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^DROP\s+COLUMN\s+(?:IF\s+EXISTS\s+)?"));
static ADD_CONSTRAINT: LazyLock<Regex> = LazyLock::new(|| pattern(r"^ADD\s+CONSTRAINT\s+"));
static DROP_CONSTRAINT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^DROP\s+CONSTRAINT\s+(?:IF\s+EXISTS\s+)?"));
static RENAME_TO: LazyLock<Regex> = LazyLock::new(|| pattern(r"^RENAME\s+TO\s+"));
static RENAME_CONSTRAINT: LazyLock<Regex> = LazyLock::new(|| pattern(r"^RENAME\s+CONSTRAINT\s+"));
static RENAME_COLUMN: LazyLock<Regex> = LazyLock::new(|| pattern(r"^RENAME\s+(?:COLUMN\s+)?"));
static TO_KEYWORD: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\s+TO\s+"));
static CREATE_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^CREATE\s+(UNIQUE\s+)?INDEX\s+(CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?",
    )
});
static ON_TABLE: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\s*ON\s+(?:ONLY\s+)?"));
static DROP_INDEX: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^DROP\s+INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+EXISTS\s+)?"));
static CREATE_VIEW: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"^CREATE\s+(?:OR\s+REPLACE\s+)?(?:(?:TEMP|TEMPORARY)\s+)?(?:RECURSIVE\s+)?(MATERIALIZED\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?",
    )
});
static DROP_VIEW: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^DROP\s+(?:MATERIALIZED\s+)?VIEW\s+(?:IF\s+EXISTS\s+)?"));
static CREATE_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"^CREATE\s+(?:OR\s+REPLACE\s+)?(?:CONSTRAINT\s+)?TRIGGER\s+")
});
static TRIGGER_ON: LazyLock<Regex> = LazyLock::new(|| pattern(r"\bON\s+"));
static DROP_TRIGGER: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^DROP\s+TRIGGER\s+(?:IF\s+EXISTS\s+)?"));
static CREATE_POLICY: LazyLock<Regex> = LazyLock::new(|| pattern(r"^CREATE\s+POLICY\s+"));
static DROP_POLICY: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^DROP\s+POLICY\s+(?:IF\s+EXISTS\s+)?"));

/// Build a case-insensitive pattern.
fn pattern(re: &str) -> Regex {
    Regex::new(&format!("(?i){}", re)).unwrap()
}

/// Classify every statement in a migration's "up" SQL.
pub fn classify(sql: &str) -> Vec<ParsedOperation> {
    split_statements(sql)
        .into_iter()
        .flat_map(|statement| classify_statement(&statement))
        .collect()
}

/// Classify one statement.
///
/// Most statements yield one operation. An `ALTER TABLE` with several
/// recognized clauses yields one per clause; a statement nothing matches
/// yields a single [`Operation::Other`].
pub fn classify_statement(statement: &str) -> Vec<ParsedOperation> {
    let head = strip_leading_comments(statement);
    let operations = match_operations(head);
    let operations = if operations.is_empty() {
        vec![Operation::Other]
    } else {
        operations
    };

    operations
        .into_iter()
        .map(|operation| ParsedOperation {
            statement: statement.to_string(),
            operation,
        })
        .collect()
}

fn match_operations(head: &str) -> Vec<Operation> {
    if let Some(rest) = after(&CREATE_TABLE, head) {
        return parse_object_name(rest)
            .map(|(table, _)| Operation::CreateTable { table })
            .into_iter()
            .collect();
    }
    if let Some(rest) = after(&DROP_TABLE, head) {
        return non_empty(parse_object_names(rest), |tables| Operation::DropTable { tables });
    }
    if let Some(rest) = after(&ALTER_TABLE, head) {
        return match parse_object_name(rest) {
            Some((table, clauses)) => alter_table_operations(&table, clauses),
            None => Vec::new(),
        };
    }
    if let Some(caps) = CREATE_INDEX.captures(head) {
        let unique = caps.get(1).is_some();
        let concurrent = caps.get(2).is_some();
        let rest = &head[caps.get(0).map_or(0, |m| m.end())..];
        return create_index_operation(rest, unique, concurrent)
            .into_iter()
            .collect();
    }
    if let Some(rest) = after(&DROP_INDEX, head) {
        return non_empty(parse_object_names(rest), |indexes| Operation::DropIndex { indexes });
    }
    if let Some(caps) = CREATE_VIEW.captures(head) {
        let materialized = caps.get(1).is_some();
        let rest = &head[caps.get(0).map_or(0, |m| m.end())..];
        return parse_object_name(rest)
            .map(|(view, _)| Operation::CreateView { view, materialized })
            .into_iter()
            .collect();
    }
    if let Some(rest) = after(&DROP_VIEW, head) {
        return non_empty(parse_object_names(rest), |views| Operation::DropView { views });
    }
    if let Some(rest) = after(&CREATE_TRIGGER, head) {
        return parse_identifier(rest)
            .and_then(|(name, rest)| {
                let on = TRIGGER_ON.find(rest)?;
                let (table, _) = parse_object_name(&rest[on.end()..])?;
                Some(Operation::CreateTrigger { name, table })
            })
            .into_iter()
            .collect();
    }
    if let Some(rest) = after(&DROP_TRIGGER, head) {
        return named_on_table(rest)
            .map(|(name, table)| Operation::DropTrigger { name, table })
            .into_iter()
            .collect();
    }
    if let Some(rest) = after(&CREATE_POLICY, head) {
        return named_on_table(rest)
            .map(|(name, table)| Operation::CreatePolicy { name, table })
            .into_iter()
            .collect();
    }
    if let Some(rest) = after(&DROP_POLICY, head) {
        return named_on_table(rest)
            .map(|(name, table)| Operation::DropPolicy { name, table })
            .into_iter()
            .collect();
    }
    Vec::new()
}

/// The text following a match of `re` at the start of `head`.
fn after<'a>(re: &Regex, head: &'a str) -> Option<&'a str> {
    re.find(head).map(|m| &head[m.end()..])
}

fn non_empty(
    names: Vec<ObjectName>,
    build: impl FnOnce(Vec<ObjectName>) -> Operation,
) -> Vec<Operation> {
    if names.is_empty() {
        Vec::new()
    } else {
        vec![build(names)]
    }
}

/// Parse `name ON table`, as in trigger and policy statements.
fn named_on_table(rest: &str) -> Option<(String, ObjectName)> {
    let (name, rest) = parse_identifier(rest)?;
    let rest = after(&ON_TABLE, rest)?;
    let (table, _) = parse_object_name(rest)?;
    Some((name, table))
}

fn alter_table_operations(table: &ObjectName, clauses: &str) -> Vec<Operation> {
    split_top_level(clauses, b',')
        .into_iter()
        .filter_map(|clause| alter_clause(table, clause.trim()))
        .collect()
}

fn alter_clause(table: &ObjectName, clause: &str) -> Option<Operation> {
    let table = table.clone();
    if let Some(rest) = after(&ADD_COLUMN, clause) {
        let (column, _) = parse_identifier(rest)?;
        return Some(Operation::AddColumn { table, column });
    }
    if let Some(rest) = after(&DROP_COLUMN, clause) {
        let (column, _) = parse_identifier(rest)?;
        return Some(Operation::DropColumn { table, column });
    }
    if let Some(rest) = after(&ADD_CONSTRAINT, clause) {
        let (constraint, rest) = parse_identifier(rest)?;
        let kind = ConstraintKind::from_clause(rest);
        return Some(Operation::AddConstraint {
            table,
            constraint,
            kind,
        });
    }
    if let Some(rest) = after(&DROP_CONSTRAINT, clause) {
        let (constraint, _) = parse_identifier(rest)?;
        return Some(Operation::DropConstraint { table, constraint });
    }
    if let Some(rest) = after(&RENAME_TO, clause) {
        let (to, _) = parse_identifier(rest)?;
        return Some(Operation::RenameTable { table, to });
    }
    if RENAME_CONSTRAINT.is_match(clause) {
        return None;
    }
    if let Some(rest) = after(&RENAME_COLUMN, clause) {
        let (from, rest) = parse_identifier(rest)?;
        let rest = after(&TO_KEYWORD, rest)?;
        let (to, _) = parse_identifier(rest)?;
        return Some(Operation::RenameColumn { table, from, to });
    }
    None
}

fn create_index_operation(rest: &str, unique: bool, concurrent: bool) -> Option<Operation> {
    // `CREATE INDEX ON t (...)` has no name; PostgreSQL picks one.
    let (name, rest) = if ON_TABLE.is_match(rest) {
        (None, rest)
    } else {
        let (name, rest) = parse_identifier(rest)?;
        (Some(name), rest)
    };
    let rest = after(&ON_TABLE, rest)?;
    let (table, rest) = parse_object_name(rest)?;
    let name = match name {
        Some(name) => name,
        None => default_index_name(&table.name, rest),
    };
    Some(Operation::CreateIndex {
        name,
        table,
        unique,
        concurrent,
    })
}

/// PostgreSQL's name for an unnamed index: `table_col1_col2_idx`.
fn default_index_name(table: &str, rest: &str) -> String {
    let columns = rest
        .find('(')
        .and_then(|open| {
            let inner = &rest[open + 1..];
            let close = matching_paren(inner)?;
            Some(&inner[..close])
        })
        .map(|inner| {
            split_top_level(inner, b',')
                .into_iter()
                .map(|col| match parse_identifier(col) {
                    Some((name, tail)) if !tail.trim_start().starts_with('(') => name,
                    _ => "expr".to_string(),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut parts = vec![table.to_string()];
    parts.extend(columns);
    parts.push("idx".to_string());
    parts.join("_")
}

/// Byte offset of the `)` closing an already-opened paren.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' if depth == 0 => return Some(i),
            b')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Split on `sep` outside parentheses and quotes.
fn split_top_level(s: &str, sep: u8) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0;

    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ if b == sep && depth == 0 => {
                    parts.push(&s[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Skip whitespace and any `--` or `/* */` comments before a statement.
pub fn strip_leading_comments(statement: &str) -> &str {
    let mut rest = statement.trim_start();
    loop {
        if rest.starts_with("--") {
            rest = match rest.find('\n') {
                Some(nl) => rest[nl + 1..].trim_start(),
                None => "",
            };
        } else if rest.starts_with("/*") {
            rest = match rest.find("*/") {
                Some(end) => rest[end + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lex {
    Code,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment(usize),
    Dollar(String),
}

/// Split SQL into trimmed, non-empty statements on top-level `;`.
///
/// Fragments that hold only comments are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut state = Lex::Code;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match &state {
            Lex::Code => match b {
                b';' => {
                    push_statement(&mut statements, &sql[start..i]);
                    start = i + 1;
                }
                b'\'' => state = Lex::SingleQuote,
                b'"' => state = Lex::DoubleQuote,
                b'-' if next == Some(b'-') => {
                    state = Lex::LineComment;
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = Lex::BlockComment(1);
                    i += 1;
                }
                b'$' if i == 0 || !is_ident_byte(bytes[i - 1]) => {
                    if let Some(tag) = dollar_tag(&sql[i..]) {
                        i += tag.len() - 1;
                        state = Lex::Dollar(tag.to_string());
                    }
                }
                _ => {}
            },
            Lex::SingleQuote => {
                if b == b'\'' {
                    state = Lex::Code;
                }
            }
            Lex::DoubleQuote => {
                if b == b'"' {
                    state = Lex::Code;
                }
            }
            Lex::LineComment => {
                if b == b'\n' {
                    state = Lex::Code;
                }
            }
            Lex::BlockComment(depth) => {
                let depth = *depth;
                if b == b'*' && next == Some(b'/') {
                    state = if depth == 1 {
                        Lex::Code
                    } else {
                        Lex::BlockComment(depth - 1)
                    };
                    i += 1;
                } else if b == b'/' && next == Some(b'*') {
                    state = Lex::BlockComment(depth + 1);
                    i += 1;
                }
            }
            Lex::Dollar(tag) => {
                if bytes[i..].starts_with(tag.as_bytes()) {
                    i += tag.len() - 1;
                    state = Lex::Code;
                }
            }
        }
        i += 1;
    }
    push_statement(&mut statements, &sql[start..]);
    statements
}

fn push_statement(statements: &mut Vec<String>, fragment: &str) {
    let fragment = fragment.trim();
    if !strip_leading_comments(fragment).is_empty() {
        statements.push(fragment.to_string());
    }
}

/// `$` inside an identifier such as `a$b` never opens a dollar quote.
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || !b.is_ascii()
}

/// Recognize a dollar-quote opener (`$$` or `$tag$`) at the start of `s`.
///
/// `$1` style parameters are not quote openers.
fn dollar_tag(s: &str) -> Option<&str> {
    let body = s.strip_prefix('$')?;
    let end = body.find('$')?;
    let tag = &body[..end];
    let valid = tag.is_empty()
        || (tag.starts_with(|c: char| c.is_alphabetic() || c == '_')
            && tag.chars().all(|c| c.is_alphanumeric() || c == '_'));
    valid.then(|| &s[..end + 2])
}

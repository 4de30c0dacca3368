//! Text helpers around generated SQL: pulling the statement out of a model
//! reply, checking it is a single read-only statement, and quoting names.

use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;

/// Extracts the SQL statement from a model reply.
///
/// Handles fenced code blocks, `SQLQuery:` prefixes and trailing
/// `SQLResult:` / `Answer:` sections, and drops the final semicolon.
pub fn extract_sql(response: &str) -> String {
    let mut text = response.trim();

    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        // skip the language tag on the opening fence
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        text = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
    }

    if let Some(start) = text.find("SQLQuery:") {
        text = &text[start + "SQLQuery:".len()..];
    }

    let end = text
        .find("SQLResult:")
        .or_else(|| text.find("Answer:"))
        .unwrap_or(text.len());

    text[..end].trim().trim_end_matches(';').trim().to_string()
}

/// Reasons a generated statement is refused before it reaches the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    Empty,
    Unparsable(String),
    MultipleStatements,
    NotReadOnly(String),
}

impl std::fmt::Display for Refusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Refusal::Empty => write!(f, "the model did not return a SQL statement"),
            Refusal::Unparsable(e) => write!(f, "could not parse the statement: {e}"),
            Refusal::MultipleStatements => write!(f, "only one statement may be run at a time"),
            Refusal::NotReadOnly(keyword) => {
                write!(f, "{keyword} statements are not allowed, only read queries")
            }
        }
    }
}

/// Accepts exactly one statement that cannot change data, parsed with the
/// connected database's dialect.
pub fn check_read_only(sql: &str, dialect: &dyn Dialect) -> Result<(), Refusal> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Err(Refusal::Empty);
    }

    let statements = Parser::parse_sql(dialect, sql).map_err(|e| Refusal::Unparsable(e.to_string()))?;
    match statements.as_slice() {
        [] => Err(Refusal::Empty),
        [statement] => statement_is_read_only(statement).map_err(Refusal::NotReadOnly),
        _ => Err(Refusal::MultipleStatements),
    }
}

fn statement_is_read_only(statement: &Statement) -> Result<(), String> {
    match statement {
        Statement::Query(query) => query_is_read_only(query),
        // EXPLAIN ANALYZE runs the wrapped statement
        Statement::Explain { analyze: true, .. } => Err("EXPLAIN ANALYZE".to_string()),
        Statement::Explain { statement, .. } => statement_is_read_only(statement),
        Statement::ExplainTable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowCollation { .. } => Ok(()),
        Statement::Pragma { value: None, .. } => Ok(()),
        other => Err(leading_keyword(&other.to_string())),
    }
}

fn query_is_read_only(query: &Query) -> Result<(), String> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            query_is_read_only(&cte.query)?;
        }
    }
    set_expr_is_read_only(&query.body)
}

fn set_expr_is_read_only(body: &SetExpr) -> Result<(), String> {
    match body {
        // SELECT ... INTO creates a table
        SetExpr::Select(select) if select.into.is_some() => Err("SELECT INTO".to_string()),
        SetExpr::Select(_) | SetExpr::Values(_) | SetExpr::Table(_) => Ok(()),
        SetExpr::Query(query) => query_is_read_only(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_read_only(left)?;
            set_expr_is_read_only(right)
        }
        other => Err(leading_keyword(&other.to_string())),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.split(|c: char| c.is_whitespace() || c == '(')
        .find(|word| !word.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase()
}

pub fn quote_double(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub fn quote_backtick(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

//! SQL parsing and validation logic.
//!
//! Uses sqlparser-rs to parse SQL and check it against the binary pass/fail
//! rules in [`super::validate`]. Keyword and catalog checks walk the AST
//! rather than regexing raw text, so string literals and identifiers never
//! trigger a false positive.

use sqlparser::ast::{
    Expr, ObjectName, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::Outcome;

const BLOCKED_CATALOGS: &[&str] = &[
    "sqlite_master",
    "sqlite_sequence",
    "pg_catalog",
    "information_schema",
];

/// Validates `sql` against the read-only rules: a single `SELECT`/`WITH ...
/// SELECT` statement, no mutating keyword anywhere (including inside a
/// data-modifying CTE), no system catalog reference, no multi-statement
/// separator.
pub fn validate(sql: &str) -> Outcome {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Outcome::Fail("empty SQL statement".to_string());
    }

    let statements = match Parser::parse_sql(&GenericDialect {}, trimmed) {
        Ok(statements) => statements,
        Err(e) => return Outcome::Fail(format!("SQL parse error: {e}")),
    };

    if statements.is_empty() {
        return Outcome::Fail("empty SQL statement".to_string());
    }
    if statements.len() > 1 {
        return Outcome::Fail("multiple statements are not allowed".to_string());
    }

    let query = match &statements[0] {
        Statement::Query(query) => query,
        other => {
            return Outcome::Fail(format!(
                "only SELECT/WITH queries are allowed, found {}",
                statement_kind(other)
            ))
        }
    };

    match check_query(query) {
        Some(reason) => Outcome::Fail(reason),
        None => Outcome::Pass,
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert(_) => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterRole { .. } => "ALTER",
        Statement::CreateTable { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateView { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. } => "CREATE",
        Statement::Grant { .. } => "GRANT",
        Statement::Revoke { .. } => "REVOKE",
        Statement::Merge { .. } => "MERGE",
        Statement::AttachDatabase { .. } => "ATTACH",
        Statement::Copy { .. } => "COPY",
        Statement::Explain { .. } => "EXPLAIN",
        _ => "non-SELECT statement",
    }
}

/// Recursively checks a query (and every CTE and nested subquery in it) for
/// a data-modifying operation or a system-catalog reference.
fn check_query(query: &Query) -> Option<String> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            if let Some(reason) = check_query(&cte.query) {
                return Some(reason);
            }
        }
    }
    check_set_expr(&query.body)
}

fn check_set_expr(set_expr: &SetExpr) -> Option<String> {
    match set_expr {
        SetExpr::Delete(_) => Some("DELETE is not allowed".to_string()),
        SetExpr::Update(_) => Some("UPDATE is not allowed".to_string()),
        SetExpr::Insert(_) => Some("INSERT is not allowed".to_string()),
        SetExpr::Merge(_) => Some("MERGE is not allowed".to_string()),
        SetExpr::Query(query) => check_query(query),
        SetExpr::Select(select) => check_select(select),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left).or_else(|| check_set_expr(right))
        }
        SetExpr::Values(_) | SetExpr::Table(_) => None,
    }
}

fn check_select(select: &Select) -> Option<String> {
    select
        .from
        .iter()
        .find_map(check_table_with_joins)
        .or_else(|| select.projection.iter().find_map(check_select_item))
        .or_else(|| select.selection.as_ref().and_then(check_expr))
        .or_else(|| select.having.as_ref().and_then(check_expr))
}

fn check_select_item(item: &SelectItem) -> Option<String> {
    match item {
        SelectItem::UnnamedExpr(expr) => check_expr(expr),
        SelectItem::ExprWithAlias { expr, .. } => check_expr(expr),
        SelectItem::QualifiedWildcard(..) | SelectItem::Wildcard(..) => None,
    }
}

/// Walks an expression tree for a subquery (`Expr::Subquery`/`Exists`/
/// `InSubquery`) reachable from projection, WHERE, or HAVING, recursing
/// through the common compound-expression shapes that can carry one.
fn check_expr(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Subquery(query) => check_query(query),
        Expr::Exists { subquery, .. } => check_query(subquery),
        Expr::InSubquery { expr, subquery, .. } => check_expr(expr).or_else(|| check_query(subquery)),
        Expr::BinaryOp { left, right, .. } => check_expr(left).or_else(|| check_expr(right)),
        Expr::UnaryOp { expr, .. } => check_expr(expr),
        Expr::Nested(expr) => check_expr(expr),
        Expr::IsNull(expr) => check_expr(expr),
        Expr::IsNotNull(expr) => check_expr(expr),
        Expr::Between { expr, low, high, .. } => {
            check_expr(expr).or_else(|| check_expr(low)).or_else(|| check_expr(high))
        }
        Expr::InList { expr, list, .. } => check_expr(expr).or_else(|| list.iter().find_map(check_expr)),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
            ..
        } => operand
            .as_deref()
            .and_then(check_expr)
            .or_else(|| conditions.iter().find_map(check_expr))
            .or_else(|| results.iter().find_map(check_expr))
            .or_else(|| else_result.as_deref().and_then(check_expr)),
        Expr::Tuple(exprs) => exprs.iter().find_map(check_expr),
        _ => None,
    }
}

fn check_table_with_joins(twj: &TableWithJoins) -> Option<String> {
    check_table_factor(&twj.relation).or_else(|| {
        twj.joins
            .iter()
            .find_map(|join| check_table_factor(&join.relation))
    })
}

fn check_table_factor(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, .. } => check_object_name(name),
        TableFactor::Derived { subquery, .. } => check_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => check_table_with_joins(table_with_joins),
        _ => None,
    }
}

fn check_object_name(name: &ObjectName) -> Option<String> {
    name.0.iter().find_map(|ident| {
        let lower = ident.value.to_lowercase();
        BLOCKED_CATALOGS
            .iter()
            .find(|blocked| **blocked == lower)
            .map(|blocked| format!("references system catalog '{blocked}'"))
    })
}

//! SQL parsing into the restricted internal query model.
//!
//! Queries are parsed with the `sqlparser` crate and lowered into a
//! single-table model: a projection, an optional predicate tree, sort
//! keys, and pagination. Joins, sub-queries, and grouping are rejected
//! here - facet and count derivatives are planned by the compiler, not
//! written in SQL.

use sqlparser::ast::{
    BinaryOperator, Expr, ObjectName, OrderByExpr, Select, SelectItem, SetExpr, Statement,
    TableFactor, UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use strata_common::types::TableId;
use strata_common::{StrataError, StrataResult};

use crate::model::SortDirection;

/// Comparison operators supported in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// A predicate tree over caller-written column names.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column <op> literal`. A `None` literal is SQL NULL and matches
    /// nothing.
    Compare {
        /// Column name as written.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Literal operand.
        value: Option<String>,
    },
    /// `column IN (v1, v2, ...)`.
    In {
        /// Column name as written.
        column: String,
        /// Accepted values.
        values: Vec<String>,
        /// `NOT IN`.
        negated: bool,
    },
    /// `column BETWEEN low AND high`.
    Between {
        /// Column name as written.
        column: String,
        /// Lower bound.
        low: String,
        /// Upper bound.
        high: String,
        /// `NOT BETWEEN`.
        negated: bool,
    },
    /// `column IS [NOT] NULL`.
    IsNull {
        /// Column name as written.
        column: String,
        /// `IS NOT NULL`.
        negated: bool,
    },
    /// `column [NOT] LIKE pattern` with `%` and `_` wildcards.
    Like {
        /// Column name as written.
        column: String,
        /// The pattern.
        pattern: String,
        /// `NOT LIKE`.
        negated: bool,
    },
    /// Conjunction.
    And(Vec<Predicate>),
    /// Disjunction.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

/// The requested select list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// `SELECT *`: every schema column in bound order.
    All,
    /// Explicit column names, in order.
    Columns(Vec<String>),
}

/// A parsed single-table query.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    /// The referenced table.
    pub table_id: TableId,
    /// Select list.
    pub projection: Projection,
    /// WHERE clause, if any.
    pub predicate: Option<Predicate>,
    /// ORDER BY keys in priority order.
    pub order_by: Vec<(String, SortDirection)>,
    /// LIMIT value written in the SQL.
    pub limit: Option<u64>,
    /// OFFSET value written in the SQL.
    pub offset: Option<u64>,
}

fn syntax(message: impl Into<String>) -> StrataError {
    StrataError::Syntax {
        message: message.into(),
    }
}

/// Parses a query string.
pub fn parse_query(sql: &str) -> StrataResult<ParsedQuery> {
    if sql.trim().is_empty() {
        return Err(syntax("empty query"));
    }
    let dialect = GenericDialect {};
    let mut statements =
        SqlParser::parse_sql(&dialect, sql).map_err(|e| syntax(e.to_string()))?;
    if statements.len() != 1 {
        return Err(syntax(format!(
            "expected one statement, got {}",
            statements.len()
        )));
    }
    let query = match statements.remove(0) {
        Statement::Query(query) => query,
        other => {
            return Err(syntax(format!(
                "only SELECT queries are supported, got: {other}"
            )))
        }
    };

    let select = match *query.body {
        SetExpr::Select(select) => select,
        _ => return Err(syntax("only plain SELECT bodies are supported")),
    };

    let table_id = single_table(&select)?;
    let projection = lower_projection(&select.projection)?;
    let predicate = select
        .selection
        .as_ref()
        .map(lower_predicate)
        .transpose()?;

    let mut order_by = Vec::new();
    if let Some(order) = &query.order_by {
        for item in &order.exprs {
            order_by.push(lower_order_item(item)?);
        }
    }

    let limit = match &query.limit {
        Some(expr) => Some(literal_u64(expr, "LIMIT")?),
        None => None,
    };
    let offset = match &query.offset {
        Some(offset) => Some(literal_u64(&offset.value, "OFFSET")?),
        None => None,
    };

    Ok(ParsedQuery {
        table_id,
        projection,
        predicate,
        order_by,
        limit,
        offset,
    })
}

/// Parses one bare condition (used for additional filters), e.g.
/// `"status = 'open'"`.
pub fn parse_condition(condition: &str) -> StrataResult<Predicate> {
    let dialect = GenericDialect {};
    let expr = SqlParser::new(&dialect)
        .try_with_sql(condition)
        .map_err(|e| syntax(e.to_string()))?
        .parse_expr()
        .map_err(|e| syntax(e.to_string()))?;
    lower_predicate(&expr)
}

/// Extracts the single source table, rejecting joins and multi-table
/// FROM lists.
fn single_table(select: &Select) -> StrataResult<TableId> {
    if select.from.len() != 1 || !select.from[0].joins.is_empty() {
        return Err(StrataError::invalid_argument(
            "joins are not supported in this context; query exactly one table",
        ));
    }
    match &select.from[0].relation {
        TableFactor::Table { name, .. } => table_id_from_name(name),
        other => Err(syntax(format!("unsupported FROM target: {other}"))),
    }
}

/// Maps a table identifier like `t42` (or bare `42`) to its id.
fn table_id_from_name(name: &ObjectName) -> StrataResult<TableId> {
    let ident = name
        .0
        .last()
        .ok_or_else(|| syntax("missing table name"))?
        .value
        .clone();
    let digits: String = ident.chars().skip_while(|c| !c.is_ascii_digit()).collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(syntax(format!("'{ident}' is not a valid table name")));
    }
    digits
        .parse::<u64>()
        .map(TableId::new)
        .map_err(|_| syntax(format!("'{ident}' is not a valid table name")))
}

fn lower_projection(items: &[SelectItem]) -> StrataResult<Projection> {
    if items.len() == 1 {
        if let SelectItem::Wildcard(_) = items[0] {
            return Ok(Projection::All);
        }
    }
    let mut columns = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectItem::UnnamedExpr(expr) => columns.push(column_name(expr)?),
            SelectItem::Wildcard(_) => {
                return Err(syntax("'*' cannot be mixed with named columns"))
            }
            other => return Err(syntax(format!("unsupported select item: {other}"))),
        }
    }
    Ok(Projection::Columns(columns))
}

fn lower_order_item(item: &OrderByExpr) -> StrataResult<(String, SortDirection)> {
    let column = column_name(&item.expr)?;
    let direction = match item.asc {
        Some(false) => SortDirection::Desc,
        _ => SortDirection::Asc,
    };
    Ok((column, direction))
}

fn lower_predicate(expr: &Expr) -> StrataResult<Predicate> {
    match expr {
        Expr::Nested(inner) => lower_predicate(inner),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => Ok(Predicate::Not(Box::new(lower_predicate(expr)?))),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Ok(Predicate::And(vec![
                lower_predicate(left)?,
                lower_predicate(right)?,
            ])),
            BinaryOperator::Or => Ok(Predicate::Or(vec![
                lower_predicate(left)?,
                lower_predicate(right)?,
            ])),
            BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq => Ok(Predicate::Compare {
                column: column_name(left)?,
                op: compare_op(op),
                value: literal_value(right)?,
            }),
            other => Err(syntax(format!("unsupported operator: {other}"))),
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let mut values = Vec::with_capacity(list.len());
            for item in list {
                values.push(
                    literal_value(item)?
                        .ok_or_else(|| syntax("NULL is not allowed in an IN list"))?,
                );
            }
            Ok(Predicate::In {
                column: column_name(expr)?,
                values,
                negated: *negated,
            })
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Predicate::Between {
            column: column_name(expr)?,
            low: literal_value(low)?
                .ok_or_else(|| syntax("BETWEEN bounds cannot be NULL"))?,
            high: literal_value(high)?
                .ok_or_else(|| syntax("BETWEEN bounds cannot be NULL"))?,
            negated: *negated,
        }),
        Expr::IsNull(inner) => Ok(Predicate::IsNull {
            column: column_name(inner)?,
            negated: false,
        }),
        Expr::IsNotNull(inner) => Ok(Predicate::IsNull {
            column: column_name(inner)?,
            negated: true,
        }),
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(Predicate::Like {
            column: column_name(expr)?,
            pattern: literal_value(pattern)?
                .ok_or_else(|| syntax("LIKE pattern cannot be NULL"))?,
            negated: *negated,
        }),
        other => Err(syntax(format!("unsupported expression: {other}"))),
    }
}

fn compare_op(op: &BinaryOperator) -> CompareOp {
    match op {
        BinaryOperator::Eq => CompareOp::Eq,
        BinaryOperator::NotEq => CompareOp::Ne,
        BinaryOperator::Lt => CompareOp::Lt,
        BinaryOperator::LtEq => CompareOp::Le,
        BinaryOperator::Gt => CompareOp::Gt,
        BinaryOperator::GtEq => CompareOp::Ge,
        _ => unreachable!("filtered by caller"),
    }
}

fn column_name(expr: &Expr) -> StrataResult<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| syntax("empty column reference")),
        other => Err(syntax(format!("expected a column reference, got: {other}"))),
    }
}

fn literal_value(expr: &Expr) -> StrataResult<Option<String>> {
    match expr {
        Expr::Value(Value::Null) => Ok(None),
        Expr::Value(Value::Number(n, _)) => Ok(Some(n.clone())),
        Expr::Value(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Expr::Value(Value::Boolean(b)) => Ok(Some(b.to_string())),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_value(expr)? {
            Some(inner) => Ok(Some(format!("-{inner}"))),
            None => Err(syntax("cannot negate NULL")),
        },
        other => Err(syntax(format!("expected a literal, got: {other}"))),
    }
}

fn literal_u64(expr: &Expr, clause: &str) -> StrataResult<u64> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n
            .parse::<u64>()
            .map_err(|_| syntax(format!("{clause} must be a non-negative integer"))),
        other => Err(syntax(format!("{clause} must be a literal, got: {other}"))),
    }
}

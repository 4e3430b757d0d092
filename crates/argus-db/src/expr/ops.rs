//! SQL expression operators.
//!
//! These structs represent compound expressions like `col = ?`, `col LIKE ?`
//! and correlated subqueries. Each implements [`Expression`] and recursively
//! builds SQL fragments.

use rusqlite::types::Value;

use crate::traits::Expression;

/// Represents a binary comparison (e.g., `=`, `>`, `<=`).
pub struct BinaryOp<L> {
    left: L,
    op: &'static str,
    right: Value,
}

impl<L> BinaryOp<L> {
    pub fn new(left: L, op: &'static str, right: Value) -> Self {
        Self { left, op, right }
    }
}

impl<L: Expression> Expression for BinaryOp<L> {
    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        let left_sql = self.left.to_sql(params);
        params.push(self.right.clone());
        format!("{} {} ?", left_sql, self.op)
    }
}

/// Represents a case-insensitive `LIKE` pattern match.
///
/// The pattern is bound as a parameter with `\` as the escape character, so
/// callers control exactly which `%`/`_` are wildcards.
pub struct LikeOp<L> {
    left: L,
    pattern: String,
    negated: bool,
}

impl<L> LikeOp<L> {
    /// Matches anywhere in the value, escaping wildcard characters in `needle`.
    pub fn contains(left: L, needle: String) -> Self {
        Self {
            left,
            pattern: format!("%{}%", escape_like(&needle)),
            negated: false,
        }
    }

    /// Matches a caller-built pattern verbatim (wildcards already placed).
    pub fn pattern(left: L, pattern: String, negated: bool) -> Self {
        Self {
            left,
            pattern,
            negated,
        }
    }
}

impl<L: Expression> Expression for LikeOp<L> {
    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        let left_sql = self.left.to_sql(params);
        params.push(self.pattern.clone().into());
        let op = if self.negated { "NOT LIKE" } else { "LIKE" };
        format!("UPPER({}) {} UPPER(?) ESCAPE '\\'", left_sql, op)
    }
}

/// Escapes `%`, `_` and `\` so they match literally inside a LIKE pattern.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Represents an `IN` or `NOT IN` clause.
pub struct InOp<L> {
    left: L,
    values: Vec<Value>,
    negated: bool,
}

impl<L> InOp<L> {
    pub fn new(left: L, values: Vec<Value>, negated: bool) -> Self {
        Self {
            left,
            values,
            negated,
        }
    }
}

impl<L: Expression> Expression for InOp<L> {
    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        // IN () is not valid SQL; an empty list matches nothing.
        if self.values.is_empty() {
            return if self.negated { "1=1" } else { "1=0" }.to_string();
        }
        let left_sql = self.left.to_sql(params);
        let placeholders = vec!["?"; self.values.len()].join(",");
        for v in &self.values {
            params.push(v.clone());
        }
        let op = if self.negated { "NOT IN" } else { "IN" };
        format!("{} {} ({})", left_sql, op, placeholders)
    }
}

/// Represents an `IS NULL` or `IS NOT NULL` check.
pub struct NullOp<L> {
    left: L,
    is_null: bool,
}

impl<L> NullOp<L> {
    pub fn new(left: L, is_null: bool) -> Self {
        Self { left, is_null }
    }
}

impl<L: Expression> Expression for NullOp<L> {
    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        let left_sql = self.left.to_sql(params);
        let op = if self.is_null {
            "IS NULL"
        } else {
            "IS NOT NULL"
        };
        format!("{} {}", left_sql, op)
    }
}

/// Combines two expressions with `AND` or `OR`.
pub struct LogicalOp<L, R> {
    left: L,
    right: R,
    op: &'static str,
}

impl<L, R> LogicalOp<L, R> {
    pub fn new(left: L, right: R, op: &'static str) -> Self {
        Self { left, right, op }
    }
}

impl<L: Expression, R: Expression> Expression for LogicalOp<L, R> {
    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        let left_sql = self.left.to_sql(params);
        let right_sql = self.right.to_sql(params);
        format!("({} {} {})", left_sql, self.op, right_sql)
    }
}

/// A raw parameterized SQL fragment.
///
/// Escape hatch for predicates the combinators cannot express, such as
/// correlated `EXISTS` subqueries. The fragment must use `?` placeholders
/// matching `params` in order.
pub struct RawSql {
    sql: String,
    params: Vec<Value>,
}

impl RawSql {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl Expression for RawSql {
    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        params.extend(self.params.iter().cloned());
        self.sql.clone()
    }
}

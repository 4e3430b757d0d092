//! Core traits that power the query builder.

use rusqlite::{types::Value, Row};

use crate::expr::ops::{BinaryOp, InOp, LikeOp, LogicalOp, NullOp};

/// A trait for types that can be converted into SQL expressions.
///
/// Implementors include [`crate::expr::Col`] (a table column) and the
/// compound operators in [`crate::expr::ops`]. When `to_sql` is called, the
/// expression appends its bound parameters to `params` and returns the SQL
/// fragment with `?` placeholders. All values reach the statement as bound
/// parameters, never as inline literals.
pub trait Expression: Sized {
    /// Converts this expression into a SQL fragment, pushing bound values.
    fn to_sql(&self, params: &mut Vec<Value>) -> String;

    /// Creates a SQL `=` condition.
    fn eq<T: Into<Value>>(self, value: T) -> BinaryOp<Self> {
        BinaryOp::new(self, "=", value.into())
    }

    /// Creates a SQL `!=` condition.
    fn ne<T: Into<Value>>(self, value: T) -> BinaryOp<Self> {
        BinaryOp::new(self, "!=", value.into())
    }

    /// Creates a SQL `>` condition.
    fn gt<T: Into<Value>>(self, value: T) -> BinaryOp<Self> {
        BinaryOp::new(self, ">", value.into())
    }

    /// Creates a SQL `<` condition.
    fn lt<T: Into<Value>>(self, value: T) -> BinaryOp<Self> {
        BinaryOp::new(self, "<", value.into())
    }

    /// Creates a SQL `>=` condition.
    fn gte<T: Into<Value>>(self, value: T) -> BinaryOp<Self> {
        BinaryOp::new(self, ">=", value.into())
    }

    /// Creates a SQL `<=` condition.
    fn lte<T: Into<Value>>(self, value: T) -> BinaryOp<Self> {
        BinaryOp::new(self, "<=", value.into())
    }

    /// Creates a SQL `LIKE` condition matching `%pattern%`.
    fn like(self, pattern: impl Into<String>) -> LikeOp<Self> {
        LikeOp::contains(self, pattern.into())
    }

    /// Creates a SQL `IN` condition. An empty list never matches.
    fn in_<T, I>(self, values: I) -> InOp<Self>
    where
        T: Into<Value>,
        I: IntoIterator<Item = T>,
    {
        let values = values.into_iter().map(|v| v.into()).collect();
        InOp::new(self, values, false)
    }

    /// Creates a SQL `NOT IN` condition. An empty list always matches.
    fn not_in<T, I>(self, values: I) -> InOp<Self>
    where
        T: Into<Value>,
        I: IntoIterator<Item = T>,
    {
        let values = values.into_iter().map(|v| v.into()).collect();
        InOp::new(self, values, true)
    }

    /// Creates a SQL `IS NULL` condition.
    fn null(self) -> NullOp<Self> {
        NullOp::new(self, true)
    }

    /// Creates a SQL `IS NOT NULL` condition.
    fn not_null(self) -> NullOp<Self> {
        NullOp::new(self, false)
    }

    /// Combines two expressions with `AND`.
    fn and<E: Expression>(self, other: E) -> LogicalOp<Self, E> {
        LogicalOp::new(self, other, "AND")
    }

    /// Combines two expressions with `OR`.
    fn or<E: Expression>(self, other: E) -> LogicalOp<Self, E> {
        LogicalOp::new(self, other, "OR")
    }
}

/// A trait for types that can be constructed from a SQLite row.
///
/// Used by the typed fetch paths of [`crate::query::SelectQuery`].
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

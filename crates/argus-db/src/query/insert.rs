use rusqlite::{types::Value, ToSql};
use tracing::trace;

use crate::{connection::Database, error::Result, expr::Col};

pub struct InsertQuery {
    db: Database,
    table: &'static str,
    columns: Vec<String>,
    values: Vec<Value>,
}

impl InsertQuery {
    pub fn into(db: Database, table: &'static str) -> Self {
        Self {
            db,
            table,
            columns: vec![],
            values: vec![],
        }
    }

    pub fn set<T, V: Into<Value>>(mut self, col: Col<T>, value: V) -> Self {
        self.columns.push(col.name.to_string());
        self.values.push(value.into());
        self
    }

    /// Executes the insert and returns the new rowid.
    pub fn execute(self) -> Result<i64> {
        let (sql, params) = self.build_sql();
        trace!(%sql, "insert");
        let conn = self.db.conn.lock()?;

        let params_ref: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        conn.execute(&sql, params_ref.as_slice())?;
        Ok(conn.last_insert_rowid())
    }

    fn build_sql(&self) -> (String, Vec<Value>) {
        let columns = self.columns.join(",");
        let placeholders = vec!["?"; self.values.len()].join(",");

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table, columns, placeholders
        );

        (sql, self.values.clone())
    }
}

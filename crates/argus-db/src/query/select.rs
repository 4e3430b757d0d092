//! The SELECT query builder.

use indexmap::IndexMap;
use rusqlite::{types::Value, ToSql};
use tracing::trace;

use crate::{
    connection::Database,
    error::Result,
    helpers::{value_ref_to_json, Row},
    query::clause::{OrderClause, WhereClause},
    traits::{Expression, FromRow},
};

/// A SQL SELECT builder assembled from keyed parts.
///
/// Every part map is keyed by a logical purpose: adding the same join source
/// or join condition twice keeps a single copy, so filters that reference the
/// same table never duplicate a join. Parts render in insertion order.
///
/// Construct with [`SelectQuery::from`], extend with `column` / `source` /
/// `cond` / `filter` / `order_by` / `limit`, then execute with
/// [`fetch`](Self::fetch), [`fetch_rows`](Self::fetch_rows) or
/// [`count_distinct`](Self::count_distinct).
pub struct SelectQuery {
    db: Database,
    columns: IndexMap<String, String>,
    sources: IndexMap<String, String>,
    wheres: IndexMap<String, WhereClause>,
    group: IndexMap<String, String>,
    orders: IndexMap<String, OrderClause>,
    limit: Option<u32>,
    where_seq: usize,
}

impl SelectQuery {
    /// Starts a new query on the given table under the given alias.
    pub fn from(db: Database, table: &str, alias: &str) -> Self {
        let mut sources = IndexMap::new();
        sources.insert(alias.to_string(), format!("{table} {alias}"));
        Self {
            db,
            columns: IndexMap::new(),
            sources,
            wheres: IndexMap::new(),
            group: IndexMap::new(),
            orders: IndexMap::new(),
            limit: None,
            where_seq: 0,
        }
    }

    /// Adds a select-list expression, deduplicated by its own text.
    pub fn column(mut self, expr: impl Into<String>) -> Self {
        let expr = expr.into();
        self.columns.entry(expr.clone()).or_insert(expr);
        self
    }

    /// Replaces the select list with the given expressions.
    pub fn set_columns<I: IntoIterator<Item = String>>(mut self, exprs: I) -> Self {
        self.columns.clear();
        for expr in exprs {
            self.columns.insert(expr.clone(), expr);
        }
        self
    }

    /// Adds a joined source table, deduplicated by `key` (usually the alias).
    pub fn source(mut self, key: &str, table_expr: impl Into<String>) -> Self {
        self.sources
            .entry(key.to_string())
            .or_insert_with(|| table_expr.into());
        self
    }

    /// Adds a WHERE condition under a logical key; a repeated key keeps the
    /// first condition.
    pub fn cond<E: Expression + 'static>(mut self, key: &str, expr: E) -> Self {
        self.wheres.entry(key.to_string()).or_insert(WhereClause {
            sql_fn: Box::new(move |params| expr.to_sql(params)),
        });
        self
    }

    /// Adds an unkeyed WHERE condition.
    pub fn filter<E: Expression + 'static>(mut self, expr: E) -> Self {
        self.where_seq += 1;
        let key = format!("__w{}", self.where_seq);
        self.wheres.insert(
            key,
            WhereClause {
                sql_fn: Box::new(move |params| expr.to_sql(params)),
            },
        );
        self
    }

    /// Adds a GROUP BY expression.
    pub fn group_by(mut self, expr: impl Into<String>) -> Self {
        let expr = expr.into();
        self.group.entry(expr.clone()).or_insert(expr);
        self
    }

    /// Adds an ORDER BY clause; a column is ordered at most once.
    pub fn order_by(mut self, column: impl Into<String>, desc: bool) -> Self {
        let column = column.into();
        self.orders.entry(column.clone()).or_insert(OrderClause {
            column,
            desc,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Fetches rows mapped through a [`FromRow`] implementation.
    pub fn fetch<E: FromRow>(self) -> Result<Vec<E>> {
        let (sql, params) = self.build_sql();
        trace!(%sql, "select");
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(&sql)?;

        let params_ref: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
        let rows = stmt.query_map(params_ref.as_slice(), E::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<E>>>()?)
    }

    /// Fetches rows as dynamic column-name to JSON-value maps.
    pub fn fetch_rows(self) -> Result<Vec<Row>> {
        let (sql, params) = self.build_sql();
        trace!(%sql, "select");
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(&sql)?;

        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let params_ref: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let mut out = Row::new();
            for (idx, name) in names.iter().enumerate() {
                out.insert(name.clone(), value_ref_to_json(row.get_ref(idx)?));
            }
            Ok(out)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<Row>>>()?)
    }

    /// Returns `COUNT(count_expr)` for the current filters.
    ///
    /// ORDER BY is always dropped here: some backends reject ORDER BY
    /// combined with a bare COUNT select list. LIMIT is dropped too, so the
    /// count reflects the pre-limit row set.
    pub fn count_distinct(self, count_expr: &str) -> Result<i64> {
        let (sql, params) = self.build_count_sql(&format!("DISTINCT {count_expr}"));
        trace!(%sql, "count");
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(&sql)?;

        let params_ref: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
        Ok(stmt.query_row(params_ref.as_slice(), |row| row.get(0))?)
    }

    /// Returns `COUNT(*)` for the current filters.
    pub fn count(self) -> Result<i64> {
        let (sql, params) = self.build_count_sql("*");
        trace!(%sql, "count");
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(&sql)?;

        let params_ref: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
        Ok(stmt.query_row(params_ref.as_slice(), |row| row.get(0))?)
    }

    fn render_from(&self) -> String {
        self.sources
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    }

    fn render_where(&self, params: &mut Vec<Value>) -> Option<String> {
        if self.wheres.is_empty() {
            return None;
        }
        let conditions = self
            .wheres
            .values()
            .map(|w| (w.sql_fn)(params))
            .collect::<Vec<_>>();
        Some(conditions.join(" AND "))
    }

    fn build_sql(&self) -> (String, Vec<Value>) {
        let mut params = vec![];

        let select = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.values().cloned().collect::<Vec<_>>().join(",")
        };

        let mut sql = format!("SELECT {} FROM {}", select, self.render_from());

        if let Some(where_sql) = self.render_where(&mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        if !self.group.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group.values().cloned().collect::<Vec<_>>().join(","));
        }

        if !self.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            let orders = self
                .orders
                .values()
                .map(|o| format!("{} {}", o.column, if o.desc { "DESC" } else { "ASC" }))
                .collect::<Vec<_>>();
            sql.push_str(&orders.join(","));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        (sql, params)
    }

    fn build_count_sql(&self, count_expr: &str) -> (String, Vec<Value>) {
        let mut params = vec![];
        let mut sql = format!("SELECT COUNT({}) FROM {}", count_expr, self.render_from());

        if let Some(where_sql) = self.render_where(&mut params) {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        (sql, params)
    }
}

//! Shared application of query options to a [`SelectQuery`].
//!
//! Every entity seeds a base query from its [`EntityDef`] and then runs the
//! same appliers over it; entities only step in to add joins before filtering
//! on joined tables.

use argus_db::{
    expr::{
        ops::{escape_like, LikeOp},
        RawSql,
    },
    helpers::json_to_value,
    Database, Expression, Row, SelectQuery,
};
use indexmap::IndexMap;
use rusqlite::types::Value;

use crate::{
    error::{ApiError, ApiResult},
    options::{Filter, GetOptions, SortOrder},
};

/// Static description of one entity: its base table and the allow-lists that
/// form the observable contract of its `get` method.
pub struct EntityDef {
    pub table: &'static str,
    pub alias: &'static str,
    pub pk: &'static str,
    /// Output and exact-match filter allow-list.
    pub fields: &'static [&'static str],
    /// Substring search allow-list.
    pub search_fields: &'static [&'static str],
    pub sort_columns: &'static [&'static str],
}

impl EntityDef {
    pub fn col(&self, field: &str) -> String {
        format!("{}.{}", self.alias, field)
    }

    pub fn pk_col(&self) -> String {
        self.col(self.pk)
    }
}

/// Seeds the base query: always selects the primary key of the base table.
pub fn base_query(db: &Database, def: &EntityDef) -> SelectQuery {
    SelectQuery::from(db.clone(), def.table, def.alias).column(def.pk_col())
}

/// Builds a `col IN (...)` condition over an id list.
pub fn id_condition(col: &str, ids: &[i64]) -> RawSql {
    if ids.is_empty() {
        return RawSql::new("1=0", vec![]);
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    RawSql::new(
        format!("{col} IN ({placeholders})"),
        ids.iter().map(|id| Value::Integer(*id)).collect(),
    )
}

/// Applies exact-match filter conditions for fields within `allowed`, scoped
/// to `alias`. Unknown fields are silently skipped, so a filter map may mix
/// fields belonging to several tables and each pass picks out its own.
pub fn apply_filter(
    mut query: SelectQuery,
    alias: &str,
    allowed: &[&str],
    filter: &Filter,
) -> SelectQuery {
    for (field, value) in filter {
        if !allowed.contains(&field.as_str()) {
            continue;
        }
        let col = format!("{alias}.{field}");
        let cond = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Array(items) => {
                if items.is_empty() {
                    RawSql::new("1=0", vec![])
                } else {
                    let placeholders = vec!["?"; items.len()].join(",");
                    RawSql::new(
                        format!("{col} IN ({placeholders})"),
                        items.iter().map(json_to_value).collect(),
                    )
                }
            }
            scalar => RawSql::new(format!("{col}=?"), vec![json_to_value(scalar)]),
        };
        query = query.filter(cond);
    }
    query
}

/// Applies case-insensitive substring search for fields within `allowed`.
///
/// Patterns honor `search_wildcards_enabled` (`*` becomes `%`),
/// `start_search` (prefix anchor) and `exclude_search` (negation); conditions
/// across fields join with OR when `search_by_any` is set, otherwise AND.
pub fn apply_search(
    mut query: SelectQuery,
    alias: &str,
    allowed: &[&str],
    search: &Filter,
    options: &GetOptions,
) -> SelectQuery {
    let mut parts: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    for (field, value) in search {
        if !allowed.contains(&field.as_str()) {
            continue;
        }
        let needles: Vec<&str> = match value {
            serde_json::Value::String(s) => vec![s.as_str()],
            serde_json::Value::Array(items) => {
                items.iter().filter_map(|v| v.as_str()).collect()
            }
            _ => continue,
        };
        for needle in needles {
            if needle.is_empty() {
                continue;
            }
            let col = RawSql::new(format!("{alias}.{field}"), vec![]);
            let like = LikeOp::pattern(
                col,
                search_pattern(needle, options),
                options.exclude_search,
            );
            parts.push(like.to_sql(&mut params));
        }
    }

    if parts.is_empty() {
        return query;
    }

    // Negated conditions must all hold; otherwise search_by_any picks OR.
    let glue = if !options.exclude_search && options.search_by_any {
        " OR "
    } else {
        " AND "
    };
    query = query.filter(RawSql::new(format!("({})", parts.join(glue)), params));
    query
}

fn search_pattern(needle: &str, options: &GetOptions) -> String {
    if options.search_wildcards_enabled {
        needle
            .split('*')
            .map(escape_like)
            .collect::<Vec<_>>()
            .join("%")
    } else if options.start_search {
        format!("{}%", escape_like(needle))
    } else {
        format!("%{}%", escape_like(needle))
    }
}

/// Applies sort options. Sortfield/sortorder pair positionally; a missing
/// order defaults to ascending. Fields were validated against the entity's
/// sort allow-list beforehand.
pub fn apply_sort(mut query: SelectQuery, def: &EntityDef, options: &GetOptions) -> SelectQuery {
    for (idx, field) in options.sortfield.iter().enumerate() {
        let desc = options
            .sortorder
            .get(idx)
            .copied()
            .unwrap_or_default()
            == SortOrder::Desc;
        query = query.order_by(def.col(field), desc);
    }
    query
}

/// Applies the output option to the select list. `extra` names fields a later
/// step needs regardless of what the caller requested (join keys for relation
/// mapping); the output shaper removes them again at the end.
pub fn apply_output(
    mut query: SelectQuery,
    def: &EntityDef,
    output: &crate::options::Output,
    extra: &[&str],
) -> SelectQuery {
    match output {
        crate::options::Output::Extend => {
            for field in def.fields {
                query = query.column(def.col(field));
            }
        }
        crate::options::Output::Fields(fields) => {
            for field in fields {
                query = query.column(def.col(field));
            }
        }
    }
    for field in extra {
        query = query.column(def.col(field));
    }
    query
}

/// Executes the query and keys the rows by the entity's primary key.
pub fn fetch_keyed(query: SelectQuery, def: &EntityDef) -> ApiResult<IndexMap<i64, Row>> {
    let rows = query.fetch_rows()?;
    let mut keyed = IndexMap::with_capacity(rows.len());
    for row in rows {
        let id = row
            .get(def.pk)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| {
                ApiError::Internal(format!("missing primary key column {}", def.pk))
            })?;
        keyed.insert(id, row);
    }
    Ok(keyed)
}

#[cfg(test)]
mod tests {
    use argus_db::migration;
    use rusqlite::params;
    use serde_json::json;

    use super::*;
    use crate::options::Output;

    const HOST: EntityDef = EntityDef {
        table: "hosts",
        alias: "h",
        pk: "hostid",
        fields: &["hostid", "host", "name", "status"],
        search_fields: &["host", "name"],
        sort_columns: &["hostid", "name", "status"],
    };

    fn test_db() -> Database {
        let db = Database::in_memory().unwrap();
        migration::migrate(&db).unwrap();
        db
    }

    fn seed(db: &Database, name: &str, status: i64) {
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO hosts (host, name, status) VALUES (?1, ?1, ?2)",
            params![name, status],
        )
        .unwrap();
    }

    fn names(db: &Database, options: &GetOptions) -> Vec<String> {
        let mut query = base_query(db, &HOST);
        if let Some(filter) = &options.filter {
            query = apply_filter(query, HOST.alias, HOST.fields, filter);
        }
        if let Some(search) = &options.search {
            query = apply_search(query, HOST.alias, HOST.search_fields, search, options);
        }
        query = apply_output(query, &HOST, &Output::Fields(vec!["name".into()]), &[]);
        query = apply_sort(query, &HOST, options);
        fetch_keyed(query, &HOST)
            .unwrap()
            .values()
            .map(|row| row["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_start_search_anchors_prefix() {
        let db = test_db();
        seed(&db, "web-01", 0);
        seed(&db, "backend-web", 0);

        let options = GetOptions {
            search: Some(json!({ "name": "web" }).as_object().unwrap().clone()),
            start_search: true,
            ..Default::default()
        };
        assert_eq!(names(&db, &options), ["web-01"]);
    }

    #[test]
    fn test_exclude_search_negates() {
        let db = test_db();
        seed(&db, "web-01", 0);
        seed(&db, "backend-web", 0);
        seed(&db, "db-01", 0);

        let options = GetOptions {
            search: Some(json!({ "name": "web" }).as_object().unwrap().clone()),
            exclude_search: true,
            ..Default::default()
        };
        assert_eq!(names(&db, &options), ["db-01"]);
    }

    #[test]
    fn test_wildcard_search() {
        let db = test_db();
        seed(&db, "web-01", 0);
        seed(&db, "web-02", 0);

        let options = GetOptions {
            search: Some(json!({ "name": "w*1" }).as_object().unwrap().clone()),
            search_wildcards_enabled: true,
            ..Default::default()
        };
        assert_eq!(names(&db, &options), ["web-01"]);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let db = test_db();
        seed(&db, "Web-01", 0);

        let options = GetOptions {
            search: Some(json!({ "name": "wEb" }).as_object().unwrap().clone()),
            ..Default::default()
        };
        assert_eq!(names(&db, &options), ["Web-01"]);
    }

    #[test]
    fn test_filter_accepts_scalar_and_array() {
        let db = test_db();
        seed(&db, "a", 0);
        seed(&db, "b", 1);
        seed(&db, "c", 2);

        let options = GetOptions {
            filter: Some(json!({ "status": [0, 2] }).as_object().unwrap().clone()),
            ..Default::default()
        };
        assert_eq!(names(&db, &options), ["a", "c"]);

        let options = GetOptions {
            filter: Some(json!({ "status": 1 }).as_object().unwrap().clone()),
            ..Default::default()
        };
        assert_eq!(names(&db, &options), ["b"]);
    }

    #[test]
    fn test_sortorder_pairs_positionally() {
        let db = test_db();
        seed(&db, "a", 1);
        seed(&db, "b", 0);
        seed(&db, "c", 1);

        let options = GetOptions {
            sortfield: vec!["status".into(), "name".into()],
            sortorder: vec![crate::options::SortOrder::Desc],
            ..Default::default()
        };
        // status descends, name defaults to ascending.
        assert_eq!(names(&db, &options), ["a", "c", "b"]);
    }

    #[test]
    fn test_sortfield_allow_list() {
        let options = GetOptions {
            sortfield: vec!["host".into()],
            ..Default::default()
        };
        let err = options.validate(&HOST).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/sortfield/1\": value must be one of \"hostid\", \"name\", \"status\"."
        );
    }

    #[test]
    fn test_empty_id_list_matches_nothing() {
        let db = test_db();
        seed(&db, "a", 0);

        let count = base_query(&db, &HOST)
            .cond("hostids", id_condition("h.hostid", &[]))
            .count_distinct("h.hostid")
            .unwrap();
        assert_eq!(count, 0);
    }
}

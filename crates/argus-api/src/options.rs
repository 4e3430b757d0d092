//! Common `get` options recognized by every entity service.

use argus_db::Row;
use indexmap::IndexMap;

use crate::{
    error::{ApiError, ApiResult},
    query::EntityDef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Requested output columns: everything, or an explicit allow-list.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Output {
    #[default]
    Extend,
    Fields(Vec<String>),
}

/// Output selection for a related child collection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectRelated {
    Extend,
    Fields(Vec<String>),
    /// Attach the number of related rows instead of the rows themselves.
    Count,
}

/// Exact-match filter / substring search map: field name to scalar or array
/// of scalars.
pub type Filter = serde_json::Map<String, serde_json::Value>;

/// Options shared by every entity `get`. Built once per request and validated
/// once; never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub output: Output,
    pub filter: Option<Filter>,
    pub search: Option<Filter>,
    /// Join multiple search conditions with OR instead of AND.
    pub search_by_any: bool,
    /// Anchor search patterns at the start of the value.
    pub start_search: bool,
    /// Negate search conditions.
    pub exclude_search: bool,
    /// Treat `*` in search values as a wildcard.
    pub search_wildcards_enabled: bool,
    pub sortfield: Vec<String>,
    pub sortorder: Vec<SortOrder>,
    pub limit: Option<u32>,
    pub count_output: bool,
    pub preservekeys: bool,
}

impl GetOptions {
    /// Checks the option set against an entity's allow-lists.
    pub fn validate(&self, def: &EntityDef) -> ApiResult<()> {
        if self.limit == Some(0) {
            return Err(ApiError::parameter("/limit", "value must be a positive integer."));
        }

        for (idx, field) in self.sortfield.iter().enumerate() {
            if !def.sort_columns.contains(&field.as_str()) {
                return Err(ApiError::parameter(
                    format!("/sortfield/{}", idx + 1),
                    format!("value must be one of \"{}\".", def.sort_columns.join("\", \"")),
                ));
            }
        }

        if let Output::Fields(fields) = &self.output {
            for field in fields {
                if !def.fields.contains(&field.as_str()) {
                    return Err(ApiError::parameter(
                        "/output",
                        format!("value \"{field}\" is not allowed."),
                    ));
                }
            }
        }

        if let Some(search) = &self.search {
            for (field, value) in search {
                let ok = match value {
                    serde_json::Value::String(_) => true,
                    serde_json::Value::Array(items) => items.iter().all(|v| v.is_string()),
                    _ => false,
                };
                if !ok {
                    return Err(ApiError::parameter(
                        format!("/search/{field}"),
                        "a character string is expected.",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Result of a `get` call.
#[derive(Debug)]
pub enum GetResult {
    Rows(Vec<Row>),
    /// Rows keyed by primary key (`preservekeys`).
    Keyed(IndexMap<i64, Row>),
    /// Row count (`count_output`).
    Count(i64),
}

impl GetResult {
    pub fn rows(self) -> Vec<Row> {
        match self {
            GetResult::Rows(rows) => rows,
            GetResult::Keyed(map) => map.into_values().collect(),
            GetResult::Count(_) => Vec::new(),
        }
    }

    pub fn keyed(self) -> IndexMap<i64, Row> {
        match self {
            GetResult::Keyed(map) => map,
            _ => IndexMap::new(),
        }
    }

    pub fn count(&self) -> Option<i64> {
        match self {
            GetResult::Count(n) => Some(*n),
            _ => None,
        }
    }
}

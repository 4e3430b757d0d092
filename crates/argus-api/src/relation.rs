//! Attaching related child collections to parent result sets.

use std::cmp::Ordering;

use argus_db::{Database, Row, SelectQuery};
use indexmap::IndexMap;

use crate::{error::ApiResult, query::id_condition};

/// Groups a child result set by its parent-reference column.
///
/// Neither result set needs to be pre-sorted; children keep their scan order
/// within each parent bucket.
pub fn relation_map(children: &IndexMap<i64, Row>, fk: &str) -> IndexMap<i64, Vec<i64>> {
    let mut map: IndexMap<i64, Vec<i64>> = IndexMap::new();
    for (child_id, row) in children {
        if let Some(parent_id) = row.get(fk).and_then(|v| v.as_i64()) {
            map.entry(parent_id).or_default().push(*child_id);
        }
    }
    map
}

/// Merges child rows into their parents under `key`.
///
/// Every parent gets the key, defaulting to an empty collection. Children are
/// sorted by `sort_fields` (then child id) before an optional per-parent
/// `cap` is applied, so the cap's result does not depend on scan order.
/// `strip` removes chaining fields from the attached copies.
pub fn merge_children(
    parents: &mut IndexMap<i64, Row>,
    children: &IndexMap<i64, Row>,
    fk: &str,
    key: &str,
    sort_fields: &[&str],
    cap: Option<usize>,
    strip: &[&str],
) {
    let map = relation_map(children, fk);

    for (parent_id, parent) in parents.iter_mut() {
        let mut child_ids = map.get(parent_id).cloned().unwrap_or_default();

        child_ids.sort_by(|a, b| {
            for field in sort_fields {
                let ord = cmp_values(
                    children.get(a).and_then(|r| r.get(*field)),
                    children.get(b).and_then(|r| r.get(*field)),
                );
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.cmp(b)
        });

        if let Some(cap) = cap {
            child_ids.truncate(cap);
        }

        let rows: Vec<serde_json::Value> = child_ids
            .iter()
            .filter_map(|id| children.get(id))
            .map(|row| {
                let mut row = row.clone();
                for field in strip {
                    row.shift_remove(*field);
                }
                serde_json::Value::Object(row)
            })
            .collect();

        parent.insert(key.to_string(), serde_json::Value::Array(rows));
    }
}

fn cmp_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a.as_str().unwrap_or("").cmp(b.as_str().unwrap_or("")),
        },
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Counts related child rows per parent with a single grouped query, instead
/// of materializing the rows.
pub fn related_counts(
    db: &Database,
    table: &str,
    fk: &str,
    parent_ids: &[i64],
) -> ApiResult<IndexMap<i64, i64>> {
    let col = format!("c.{fk}");
    let rows = SelectQuery::from(db.clone(), table, "c")
        .column(col.clone())
        .column("COUNT(*) AS rowscount")
        .filter(id_condition(&col, parent_ids))
        .group_by(col)
        .fetch_rows()?;

    let mut counts = IndexMap::with_capacity(rows.len());
    for row in rows {
        if let (Some(id), Some(count)) = (
            row.get(fk).and_then(|v| v.as_i64()),
            row.get("rowscount").and_then(|v| v.as_i64()),
        ) {
            counts.insert(id, count);
        }
    }
    Ok(counts)
}

/// Merges per-parent counts under `key`, defaulting to zero.
pub fn merge_counts(parents: &mut IndexMap<i64, Row>, counts: &IndexMap<i64, i64>, key: &str) {
    for (parent_id, parent) in parents.iter_mut() {
        let count = counts.get(parent_id).copied().unwrap_or(0);
        parent.insert(key.to_string(), serde_json::Value::from(count));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn child(id: i64, fk: i64, value: &str, sortorder: i64) -> (i64, Row) {
        let mut row = Row::new();
        row.insert("valuemap_mappingid".into(), json!(id));
        row.insert("valuemapid".into(), json!(fk));
        row.insert("value".into(), json!(value));
        row.insert("sortorder".into(), json!(sortorder));
        (id, row)
    }

    fn parent(id: i64) -> (i64, Row) {
        let mut row = Row::new();
        row.insert("valuemapid".into(), json!(id));
        (id, row)
    }

    #[test]
    fn test_relation_map_groups_by_reference_column() {
        let children: IndexMap<i64, Row> =
            [child(10, 1, "a", 0), child(11, 2, "b", 0), child(12, 1, "c", 1)]
                .into_iter()
                .collect();

        let map = relation_map(&children, "valuemapid");

        assert_eq!(map[&1], vec![10, 12]);
        assert_eq!(map[&2], vec![11]);
    }

    #[test]
    fn test_merge_defaults_to_empty_collection() {
        let mut parents: IndexMap<i64, Row> = [parent(1), parent(2)].into_iter().collect();
        let children: IndexMap<i64, Row> = [child(10, 1, "a", 0)].into_iter().collect();

        merge_children(&mut parents, &children, "valuemapid", "mappings", &[], None, &[]);

        assert_eq!(parents[&1]["mappings"].as_array().unwrap().len(), 1);
        assert_eq!(parents[&2]["mappings"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_cap_applies_after_deterministic_sort() {
        let mut parents: IndexMap<i64, Row> = [parent(1)].into_iter().collect();
        // Insertion order deliberately differs from sort order.
        let children: IndexMap<i64, Row> =
            [child(12, 1, "down", 2), child(10, 1, "up", 0), child(11, 1, "flap", 1)]
                .into_iter()
                .collect();

        merge_children(
            &mut parents,
            &children,
            "valuemapid",
            "mappings",
            &["sortorder", "value"],
            Some(2),
            &[],
        );

        let mappings = parents[&1]["mappings"].as_array().unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0]["value"], "up");
        assert_eq!(mappings[1]["value"], "flap");
    }

    #[test]
    fn test_strip_removes_chaining_fields() {
        let mut parents: IndexMap<i64, Row> = [parent(1)].into_iter().collect();
        let children: IndexMap<i64, Row> = [child(10, 1, "a", 0)].into_iter().collect();

        merge_children(
            &mut parents,
            &children,
            "valuemapid",
            "mappings",
            &[],
            None,
            &["valuemap_mappingid", "valuemapid"],
        );

        let mapping = &parents[&1]["mappings"][0];
        assert!(mapping.get("valuemap_mappingid").is_none());
        assert!(mapping.get("valuemapid").is_none());
        assert_eq!(mapping["value"], "a");
    }
}

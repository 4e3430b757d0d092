//! Graph item listing.
//!
//! Graph items hang off items, so row-level visibility follows the owning
//! host of the underlying item.

use indexmap::IndexMap;

use crate::{
    error::ApiResult,
    options::{GetOptions, GetResult, Output},
    output::{finalize, unset_extra},
    permission::{host_rights_cond, PERM_READ},
    query::{
        apply_filter, apply_output, apply_sort, base_query, fetch_keyed, id_condition, EntityDef,
    },
    user::ApiUser,
    Api,
};

const GRAPH_ITEM: EntityDef = EntityDef {
    table: "graphs_items",
    alias: "gi",
    pk: "gitemid",
    fields: &[
        "gitemid",
        "graphid",
        "itemid",
        "drawtype",
        "sortorder",
        "color",
        "yaxisside",
        "calc_fnc",
        "type",
    ],
    search_fields: &[],
    sort_columns: &["gitemid"],
};

const GRAPH: EntityDef = EntityDef {
    table: "graphs",
    alias: "g",
    pk: "graphid",
    fields: &["graphid", "name", "width", "height"],
    search_fields: &["name"],
    sort_columns: &["graphid", "name"],
};

#[derive(Debug, Default)]
pub struct GraphItemGet {
    pub gitemids: Option<Vec<i64>>,
    pub graphids: Option<Vec<i64>>,
    pub itemids: Option<Vec<i64>>,
    /// Attach the owning graph under `graphs`.
    pub select_graphs: Option<Output>,
    pub options: GetOptions,
}

pub struct GraphItemApi<'a> {
    pub(crate) api: &'a Api,
}

impl GraphItemApi<'_> {
    pub fn get(&self, user: &ApiUser, params: GraphItemGet) -> ApiResult<GetResult> {
        params.options.validate(&GRAPH_ITEM)?;
        if let Some(Output::Fields(fields)) = &params.select_graphs {
            for field in fields {
                if !GRAPH.fields.contains(&field.as_str()) {
                    return Err(crate::error::ApiError::parameter(
                        "/selectGraphs",
                        format!("value \"{field}\" is not allowed."),
                    ));
                }
            }
        }

        let mut query = base_query(&self.api.db, &GRAPH_ITEM);

        // Row-level ACL through the item's host; deny wins.
        if !user.is_super_admin() {
            query = query
                .source("i", "items i")
                .cond("gi-i", argus_db::expr::RawSql::new("gi.itemid=i.itemid", vec![]))
                .filter(host_rights_cond("i.hostid", user, PERM_READ));
        }

        if let Some(ids) = &params.gitemids {
            query = query.cond("gitemids", id_condition(&GRAPH_ITEM.pk_col(), ids));
        }

        if let Some(ids) = &params.graphids {
            query = query.cond("graphids", id_condition(&GRAPH_ITEM.col("graphid"), ids));
        }

        if let Some(ids) = &params.itemids {
            query = query.cond("itemids", id_condition(&GRAPH_ITEM.col("itemid"), ids));
        }

        if let Some(filter) = &params.options.filter {
            query = apply_filter(query, GRAPH_ITEM.alias, GRAPH_ITEM.fields, filter);
        }

        if params.options.count_output {
            return Ok(GetResult::Count(
                query.count_distinct(&GRAPH_ITEM.pk_col())?,
            ));
        }

        let extra = if params.select_graphs.is_some() {
            &["graphid"][..]
        } else {
            &[]
        };
        query = apply_output(query, &GRAPH_ITEM, &params.options.output, extra);
        query = apply_sort(query, &GRAPH_ITEM, &params.options);
        query = query.limit(params.options.limit.unwrap_or(self.api.config.search_limit));

        let mut rows = fetch_keyed(query, &GRAPH_ITEM)?;

        if let Some(output) = &params.select_graphs {
            self.add_graphs(&mut rows, output)?;
        }

        let mut extra_fields = vec![GRAPH_ITEM.pk];
        if params.select_graphs.is_some() {
            extra_fields.push("graphid");
        }
        unset_extra(&mut rows, &params.options.output, &extra_fields);

        Ok(finalize(rows, params.options.preservekeys))
    }

    fn add_graphs(
        &self,
        rows: &mut IndexMap<i64, argus_db::Row>,
        output: &Output,
    ) -> ApiResult<()> {
        let graphids: Vec<i64> = rows
            .values()
            .filter_map(|row| row.get("graphid").and_then(|v| v.as_i64()))
            .collect();

        let mut query = base_query(&self.api.db, &GRAPH)
            .cond("graphids", id_condition(&GRAPH.pk_col(), &graphids));
        query = apply_output(query, &GRAPH, output, &[]);

        let mut graphs = fetch_keyed(query, &GRAPH)?;
        unset_extra(&mut graphs, output, &[GRAPH.pk]);

        for row in rows.values_mut() {
            let attached = row
                .get("graphid")
                .and_then(|v| v.as_i64())
                .and_then(|id| graphs.get(&id))
                .map(|graph| vec![serde_json::Value::Object(graph.clone())])
                .unwrap_or_default();
            row.insert("graphs".to_string(), serde_json::Value::Array(attached));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::params;
    use serde_json::json;

    use super::*;
    use crate::{
        permission::{PERM_DENY, PERM_READ_WRITE},
        testutil::{grant, link_host_group, plain_user, seed_host, seed_host_group, super_admin,
                   test_api},
    };

    fn seed_item(api: &Api, hostid: i64, name: &str) -> i64 {
        let conn = api.db().conn.lock().unwrap();
        conn.execute(
            "INSERT INTO items (hostid, name, key_) VALUES (?1, ?2, ?2)",
            params![hostid, name],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn seed_graph(api: &Api, name: &str) -> i64 {
        let conn = api.db().conn.lock().unwrap();
        conn.execute("INSERT INTO graphs (name) VALUES (?1)", params![name])
            .unwrap();
        conn.last_insert_rowid()
    }

    fn seed_graph_item(api: &Api, graphid: i64, itemid: i64, color: &str) -> i64 {
        let conn = api.db().conn.lock().unwrap();
        conn.execute(
            "INSERT INTO graphs_items (graphid, itemid, color) VALUES (?1, ?2, ?3)",
            params![graphid, itemid, color],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_permission_follows_item_host() {
        let api = test_api();
        let hostid = seed_host(&api, "db-01");
        let groupid = seed_host_group(&api, "Databases");
        link_host_group(&api, hostid, groupid);

        let itemid = seed_item(&api, hostid, "cpu");
        let graphid = seed_graph(&api, "CPU load");
        seed_graph_item(&api, graphid, itemid, "009600");

        // No grant yet: invisible.
        let user = plain_user(vec![70]);
        let rows = api
            .graph_items()
            .get(&user, GraphItemGet::default())
            .unwrap()
            .rows();
        assert!(rows.is_empty());

        grant(&api, 70, groupid, PERM_READ_WRITE);
        let rows = api
            .graph_items()
            .get(&user, GraphItemGet::default())
            .unwrap()
            .rows();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_deny_wins_over_grant() {
        let api = test_api();
        let hostid = seed_host(&api, "db-01");
        let group_a = seed_host_group(&api, "Databases");
        let group_b = seed_host_group(&api, "All hosts");
        link_host_group(&api, hostid, group_a);
        link_host_group(&api, hostid, group_b);

        let itemid = seed_item(&api, hostid, "cpu");
        let graphid = seed_graph(&api, "CPU load");
        seed_graph_item(&api, graphid, itemid, "009600");

        // One group grants read-write, the other explicitly denies.
        grant(&api, 70, group_a, PERM_READ_WRITE);
        grant(&api, 70, group_b, PERM_DENY);

        let rows = api
            .graph_items()
            .get(&plain_user(vec![70]), GraphItemGet::default())
            .unwrap()
            .rows();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_select_graphs() {
        let api = test_api();
        let hostid = seed_host(&api, "db-01");
        let itemid = seed_item(&api, hostid, "cpu");
        let graphid = seed_graph(&api, "CPU load");
        seed_graph_item(&api, graphid, itemid, "1A7C11");

        let rows = api
            .graph_items()
            .get(
                &super_admin(),
                GraphItemGet {
                    graphids: Some(vec![graphid]),
                    select_graphs: Some(Output::Fields(vec!["name".into()])),
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows[0]["graphs"][0]["name"], "CPU load");
        assert_eq!(rows[0]["color"], "1A7C11");
    }

    #[test]
    fn test_type_filter() {
        let api = test_api();
        let hostid = seed_host(&api, "db-01");
        let itemid = seed_item(&api, hostid, "cpu");
        let graphid = seed_graph(&api, "CPU load");

        seed_graph_item(&api, graphid, itemid, "009600");
        {
            let conn = api.db().conn.lock().unwrap();
            conn.execute(
                "INSERT INTO graphs_items (graphid, itemid, type) VALUES (?1, ?2, 2)",
                params![graphid, itemid],
            )
            .unwrap();
        }

        let rows = api
            .graph_items()
            .get(
                &super_admin(),
                GraphItemGet {
                    options: GetOptions {
                        filter: Some(json!({ "type": 2 }).as_object().unwrap().clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["type"], 2);
    }
}

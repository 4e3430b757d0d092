//! High-availability node listing.

use crate::{
    error::ApiResult,
    options::{GetOptions, GetResult},
    output::{finalize, unset_extra},
    permission::empty_result,
    query::{
        apply_filter, apply_output, apply_search, apply_sort, base_query, fetch_keyed,
        id_condition, EntityDef,
    },
    user::ApiUser,
    Api,
};

const HA_NODE: EntityDef = EntityDef {
    table: "ha_node",
    alias: "han",
    pk: "ha_nodeid",
    fields: &["ha_nodeid", "name", "address", "port", "lastaccess", "status"],
    search_fields: &["name", "address"],
    sort_columns: &["name", "lastaccess", "status"],
};

#[derive(Debug, Default)]
pub struct HaNodeGet {
    pub ha_nodeids: Option<Vec<i64>>,
    pub options: GetOptions,
}

pub struct HaNodeApi<'a> {
    pub(crate) api: &'a Api,
}

impl HaNodeApi<'_> {
    pub fn get(&self, user: &ApiUser, params: HaNodeGet) -> ApiResult<GetResult> {
        params.options.validate(&HA_NODE)?;

        if !user.is_super_admin() {
            return Ok(empty_result(&params.options));
        }

        let mut query = base_query(&self.api.db, &HA_NODE);

        if let Some(ids) = &params.ha_nodeids {
            query = query.cond("ha_nodeids", id_condition(&HA_NODE.pk_col(), ids));
        }

        if let Some(filter) = &params.options.filter {
            query = apply_filter(query, HA_NODE.alias, HA_NODE.fields, filter);
        }

        if let Some(search) = &params.options.search {
            query = apply_search(
                query,
                HA_NODE.alias,
                HA_NODE.search_fields,
                search,
                &params.options,
            );
        }

        if params.options.count_output {
            return Ok(GetResult::Count(query.count_distinct(&HA_NODE.pk_col())?));
        }

        query = apply_output(query, &HA_NODE, &params.options.output, &[]);
        query = apply_sort(query, &HA_NODE, &params.options);
        query = query.limit(params.options.limit.unwrap_or(self.api.config.search_limit));

        let mut rows = fetch_keyed(query, &HA_NODE)?;
        unset_extra(&mut rows, &params.options.output, &[HA_NODE.pk]);

        Ok(finalize(rows, params.options.preservekeys))
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::params;
    use serde_json::json;

    use super::*;
    use crate::{
        options::{Output, SortOrder},
        testutil::{plain_user, super_admin, test_api},
    };

    fn seed_node(api: &Api, name: &str, address: &str, status: i64) -> i64 {
        let conn = api.db().conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ha_node (name, address, status) VALUES (?1, ?2, ?3)",
            params![name, address, status],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_get_requires_super_admin() {
        let api = test_api();
        seed_node(&api, "node-1", "10.0.0.1", 3);

        let rows = api
            .ha_nodes()
            .get(&plain_user(vec![]), HaNodeGet::default())
            .unwrap()
            .rows();
        assert!(rows.is_empty());

        let count = api
            .ha_nodes()
            .get(
                &plain_user(vec![]),
                HaNodeGet {
                    options: GetOptions {
                        count_output: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(count.count(), Some(0));
    }

    #[test]
    fn test_filter_and_sort() {
        let api = test_api();
        seed_node(&api, "node-b", "10.0.0.2", 0);
        seed_node(&api, "node-a", "10.0.0.1", 3);
        seed_node(&api, "node-c", "10.0.0.3", 3);

        let rows = api
            .ha_nodes()
            .get(
                &super_admin(),
                HaNodeGet {
                    options: GetOptions {
                        filter: Some(
                            json!({ "status": 3 }).as_object().unwrap().clone(),
                        ),
                        sortfield: vec!["name".into()],
                        sortorder: vec![SortOrder::Desc],
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "node-c");
        assert_eq!(rows[1]["name"], "node-a");
    }

    #[test]
    fn test_count_matches_row_set_pre_limit() {
        let api = test_api();
        for i in 0..4 {
            seed_node(&api, &format!("node-{i}"), "10.0.0.9", 0);
        }

        let count = api
            .ha_nodes()
            .get(
                &super_admin(),
                HaNodeGet {
                    options: GetOptions {
                        count_output: true,
                        limit: Some(2),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(count.count(), Some(4));

        let rows = api
            .ha_nodes()
            .get(
                &super_admin(),
                HaNodeGet {
                    options: GetOptions {
                        limit: Some(2),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_preservekeys_keys_are_primary_keys() {
        let api = test_api();
        let id_a = seed_node(&api, "node-a", "10.0.0.1", 0);
        let id_b = seed_node(&api, "node-b", "10.0.0.2", 0);

        let keyed = api
            .ha_nodes()
            .get(
                &super_admin(),
                HaNodeGet {
                    options: GetOptions {
                        preservekeys: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .keyed();

        assert_eq!(keyed.keys().copied().collect::<Vec<_>>(), vec![id_a, id_b]);
        for (id, row) in keyed {
            assert_eq!(row["ha_nodeid"], json!(id));
        }
    }

    #[test]
    fn test_output_allow_list() {
        let api = test_api();
        seed_node(&api, "node-a", "10.0.0.1", 0);

        let rows = api
            .ha_nodes()
            .get(
                &super_admin(),
                HaNodeGet {
                    options: GetOptions {
                        output: Output::Fields(vec!["name".into(), "address".into()]),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        let fields: Vec<&String> = rows[0].keys().collect();
        assert_eq!(fields, ["name", "address"]);

        let err = api
            .ha_nodes()
            .get(
                &super_admin(),
                HaNodeGet {
                    options: GetOptions {
                        output: Output::Fields(vec!["port".into(), "uptime".into()]),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("\"uptime\" is not allowed"));
    }

    #[test]
    fn test_search_by_any() {
        let api = test_api();
        seed_node(&api, "edge-fra", "10.1.0.1", 0);
        seed_node(&api, "edge-ams", "10.2.0.1", 0);
        seed_node(&api, "core-fra", "10.3.0.1", 0);

        let rows = api
            .ha_nodes()
            .get(
                &super_admin(),
                HaNodeGet {
                    options: GetOptions {
                        search: Some(
                            json!({ "name": "edge", "address": "10.3" })
                                .as_object()
                                .unwrap()
                                .clone(),
                        ),
                        search_by_any: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows.len(), 3);
    }
}

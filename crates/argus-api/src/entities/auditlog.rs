//! Audit log queries.

use argus_db::expr::RawSql;
use rusqlite::types::Value;

use crate::{
    error::{ApiError, ApiResult},
    options::{Filter, GetOptions, GetResult, SelectRelated},
    output::{finalize, unset_extra},
    permission::empty_result,
    query::{
        apply_filter, apply_output, apply_search, apply_sort, base_query, fetch_keyed,
        id_condition, EntityDef,
    },
    relation::{merge_children, merge_counts, related_counts},
    user::ApiUser,
    Api,
};

const AUDITLOG: EntityDef = EntityDef {
    table: "auditlog",
    alias: "a",
    pk: "auditid",
    fields: &[
        "auditid",
        "userid",
        "username",
        "clock",
        "ip",
        "action",
        "resourcetype",
        "resourceid",
        "resourcename",
        "recordsetid",
    ],
    search_fields: &["username", "ip", "resourcename", "recordsetid"],
    sort_columns: &["auditid", "userid", "clock"],
};

const DETAILS: EntityDef = EntityDef {
    table: "auditlog_details",
    alias: "ad",
    pk: "auditdetailid",
    fields: &["table_name", "field_name", "oldvalue", "newvalue"],
    search_fields: &["table_name", "field_name", "oldvalue", "newvalue"],
    sort_columns: &[],
};

#[derive(Debug, Default)]
pub struct AuditLogGet {
    pub auditids: Option<Vec<i64>>,
    pub userids: Option<Vec<i64>>,
    pub time_from: Option<i64>,
    pub time_till: Option<i64>,
    /// Attach per-field change rows under `details`.
    pub select_details: Option<SelectRelated>,
    pub options: GetOptions,
}

pub struct AuditLogApi<'a> {
    pub(crate) api: &'a Api,
}

impl AuditLogApi<'_> {
    pub fn get(&self, user: &ApiUser, params: AuditLogGet) -> ApiResult<GetResult> {
        params.options.validate(&AUDITLOG)?;
        if let Some(SelectRelated::Fields(fields)) = &params.select_details {
            for field in fields {
                if !DETAILS.fields.contains(&field.as_str()) {
                    return Err(ApiError::parameter(
                        "/selectDetails",
                        format!("value \"{field}\" is not allowed."),
                    ));
                }
            }
        }

        if !user.is_super_admin() {
            return Ok(empty_result(&params.options));
        }

        let mut query = base_query(&self.api.db, &AUDITLOG);

        if let Some(ids) = &params.auditids {
            query = query.cond("auditids", id_condition(&AUDITLOG.pk_col(), ids));
        }

        if let Some(ids) = &params.userids {
            query = query.cond("userids", id_condition(&AUDITLOG.col("userid"), ids));
        }

        if let Some(time_from) = params.time_from {
            query = query.cond(
                "time_from",
                RawSql::new("a.clock>=?", vec![Value::Integer(time_from)]),
            );
        }

        if let Some(time_till) = params.time_till {
            query = query.cond(
                "time_till",
                RawSql::new("a.clock<=?", vec![Value::Integer(time_till)]),
            );
        }

        // Filter and search keys that belong to the details child table pull
        // the join in; base-table keys go through the unscoped pass. Either
        // pass silently skips the other's fields.
        if references_details(params.options.filter.as_ref())
            || references_details(params.options.search.as_ref())
        {
            query = query
                .source("ad", "auditlog_details ad")
                .cond("a-ad", RawSql::new("a.auditid=ad.auditid", vec![]));
        }

        if let Some(filter) = &params.options.filter {
            query = apply_filter(query, AUDITLOG.alias, AUDITLOG.fields, filter);
            query = apply_filter(query, DETAILS.alias, DETAILS.fields, filter);
        }

        if let Some(search) = &params.options.search {
            query = apply_search(
                query,
                AUDITLOG.alias,
                AUDITLOG.search_fields,
                search,
                &params.options,
            );
            query = apply_search(
                query,
                DETAILS.alias,
                DETAILS.search_fields,
                search,
                &params.options,
            );
        }

        if params.options.count_output {
            return Ok(GetResult::Count(query.count_distinct(&AUDITLOG.pk_col())?));
        }

        query = apply_output(query, &AUDITLOG, &params.options.output, &[]);
        query = apply_sort(query, &AUDITLOG, &params.options);
        query = query.limit(params.options.limit.unwrap_or(self.api.config.search_limit));

        let mut rows = fetch_keyed(query, &AUDITLOG)?;

        match &params.select_details {
            Some(SelectRelated::Count) => {
                let auditids: Vec<i64> = rows.keys().copied().collect();
                let counts =
                    related_counts(&self.api.db, DETAILS.table, "auditid", &auditids)?;
                merge_counts(&mut rows, &counts, "details");
            }
            Some(select) => {
                let auditids: Vec<i64> = rows.keys().copied().collect();
                let fields = match select {
                    SelectRelated::Fields(fields) => {
                        fields.iter().map(String::as_str).collect::<Vec<_>>()
                    }
                    _ => DETAILS.fields.to_vec(),
                };

                let mut child_query = base_query(&self.api.db, &DETAILS)
                    .cond("auditids", id_condition(&DETAILS.col("auditid"), &auditids))
                    .column(DETAILS.col("auditid"));
                for field in &fields {
                    child_query = child_query.column(DETAILS.col(field));
                }

                let details = fetch_keyed(child_query, &DETAILS)?;
                merge_children(
                    &mut rows,
                    &details,
                    "auditid",
                    "details",
                    &[],
                    None,
                    &[DETAILS.pk, "auditid"],
                );
            }
            None => {}
        }

        unset_extra(&mut rows, &params.options.output, &[AUDITLOG.pk]);

        Ok(finalize(rows, params.options.preservekeys))
    }
}

fn references_details(map: Option<&Filter>) -> bool {
    map.is_some_and(|m| m.keys().any(|k| DETAILS.fields.contains(&k.as_str())))
}

#[cfg(test)]
mod tests {
    use rusqlite::params;
    use serde_json::json;

    use super::*;
    use crate::testutil::{admin, super_admin, test_api};

    fn seed_entry(api: &Api, userid: i64, clock: i64, resourcename: &str) -> i64 {
        let conn = api.db().conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auditlog (userid, username, clock, action, resourcetype, resourcename) \
             VALUES (?1, 'Admin', ?2, 1, 17, ?3)",
            params![userid, clock, resourcename],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn seed_detail(api: &Api, auditid: i64, field: &str, old: &str, new: &str) {
        let conn = api.db().conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auditlog_details (auditid, table_name, field_name, oldvalue, newvalue) \
             VALUES (?1, 'valuemap', ?2, ?3, ?4)",
            params![auditid, field, old, new],
        )
        .unwrap();
    }

    #[test]
    fn test_super_admin_only() {
        let api = test_api();
        seed_entry(&api, 1, 100, "Status");

        let rows = api
            .auditlog()
            .get(&admin(vec![]), AuditLogGet::default())
            .unwrap()
            .rows();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_time_range() {
        let api = test_api();
        seed_entry(&api, 1, 100, "a");
        seed_entry(&api, 1, 200, "b");
        seed_entry(&api, 1, 300, "c");

        let rows = api
            .auditlog()
            .get(
                &super_admin(),
                AuditLogGet {
                    time_from: Some(150),
                    time_till: Some(250),
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["resourcename"], "b");
    }

    #[test]
    fn test_detail_filter_injects_join() {
        let api = test_api();
        let with_detail = seed_entry(&api, 1, 100, "Status");
        seed_entry(&api, 1, 110, "Other");
        seed_detail(&api, with_detail, "name", "Status", "State");

        let rows = api
            .auditlog()
            .get(
                &super_admin(),
                AuditLogGet {
                    options: GetOptions {
                        filter: Some(
                            json!({ "field_name": "name", "userid": 1 })
                                .as_object()
                                .unwrap()
                                .clone(),
                        ),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["auditid"], json!(with_detail));
    }

    #[test]
    fn test_detail_search() {
        let api = test_api();
        let auditid = seed_entry(&api, 1, 100, "Status");
        seed_detail(&api, auditid, "name", "Old map name", "New map name");

        let rows = api
            .auditlog()
            .get(
                &super_admin(),
                AuditLogGet {
                    options: GetOptions {
                        search: Some(
                            json!({ "newvalue": "map name" }).as_object().unwrap().clone(),
                        ),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_select_details() {
        let api = test_api();
        let auditid = seed_entry(&api, 1, 100, "Status");
        seed_detail(&api, auditid, "name", "a", "b");
        seed_detail(&api, auditid, "hostid", "1", "2");
        let bare = seed_entry(&api, 1, 110, "Other");

        let keyed = api
            .auditlog()
            .get(
                &super_admin(),
                AuditLogGet {
                    select_details: Some(SelectRelated::Extend),
                    options: GetOptions {
                        preservekeys: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap()
            .keyed();

        assert_eq!(keyed[&auditid]["details"].as_array().unwrap().len(), 2);
        assert_eq!(keyed[&bare]["details"].as_array().unwrap().len(), 0);

        let details = keyed[&auditid]["details"].as_array().unwrap();
        assert!(details[0].get("auditdetailid").is_none());
        assert_eq!(details[0]["table_name"], "valuemap");
    }

    #[test]
    fn test_select_details_count() {
        let api = test_api();
        let auditid = seed_entry(&api, 1, 100, "Status");
        seed_detail(&api, auditid, "name", "a", "b");
        seed_detail(&api, auditid, "hostid", "1", "2");

        let rows = api
            .auditlog()
            .get(
                &super_admin(),
                AuditLogGet {
                    select_details: Some(SelectRelated::Count),
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows[0]["details"], 2);
    }

    #[test]
    fn test_join_deduplicates_rows() {
        let api = test_api();
        let auditid = seed_entry(&api, 1, 100, "Status");
        seed_detail(&api, auditid, "name", "map a", "map b");
        seed_detail(&api, auditid, "name2", "map c", "map d");

        // Both detail rows match; the entry must still come back once.
        let result = api
            .auditlog()
            .get(
                &super_admin(),
                AuditLogGet {
                    options: GetOptions {
                        search: Some(json!({ "oldvalue": "map" }).as_object().unwrap().clone()),
                        count_output: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(result.count(), Some(1));
    }
}

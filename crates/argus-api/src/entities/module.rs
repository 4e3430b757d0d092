//! Frontend module registry.

use argus_db::{helpers::to_json, helpers::value_ref_to_json, Row};
use rusqlite::{params, Transaction};
use serde_json::json;

use crate::{
    audit::{self, AuditAction, AuditEntry, AuditResource},
    error::{ApiError, ApiResult},
    options::{GetOptions, GetResult},
    output::{finalize, unset_extra},
    permission::{empty_result, require_role},
    query::{
        apply_filter, apply_output, apply_search, apply_sort, base_query, fetch_keyed,
        id_condition, EntityDef,
    },
    user::{ApiUser, Role},
    validate::{check, Field, Rule},
    Api,
};

const MODULE: EntityDef = EntityDef {
    table: "module",
    alias: "md",
    pk: "moduleid",
    fields: &["moduleid", "id", "relative_path", "status", "config"],
    search_fields: &["id", "relative_path"],
    sort_columns: &["moduleid", "relative_path"],
};

#[derive(Debug, Default)]
pub struct ModuleGet {
    pub moduleids: Option<Vec<i64>>,
    pub options: GetOptions,
}

pub struct ModuleApi<'a> {
    pub(crate) api: &'a Api,
}

impl ModuleApi<'_> {
    pub fn get(&self, user: &ApiUser, params: ModuleGet) -> ApiResult<GetResult> {
        params.options.validate(&MODULE)?;

        if !user.is_super_admin() {
            return Ok(empty_result(&params.options));
        }

        let mut query = base_query(&self.api.db, &MODULE);

        if let Some(ids) = &params.moduleids {
            query = query.cond("moduleids", id_condition(&MODULE.pk_col(), ids));
        }

        if let Some(filter) = &params.options.filter {
            query = apply_filter(query, MODULE.alias, MODULE.fields, filter);
        }

        if let Some(search) = &params.options.search {
            query = apply_search(
                query,
                MODULE.alias,
                MODULE.search_fields,
                search,
                &params.options,
            );
        }

        if params.options.count_output {
            return Ok(GetResult::Count(query.count_distinct(&MODULE.pk_col())?));
        }

        query = apply_output(query, &MODULE, &params.options.output, &[]);
        query = apply_sort(query, &MODULE, &params.options);
        query = query.limit(params.options.limit.unwrap_or(self.api.config.search_limit));

        let mut rows = fetch_keyed(query, &MODULE)?;

        // The config column holds serialized JSON; hand it back structured.
        for row in rows.values_mut() {
            if let Some(serde_json::Value::String(raw)) = row.get("config").cloned() {
                let parsed = serde_json::from_str(&raw)
                    .unwrap_or(serde_json::Value::String(raw));
                row.insert("config".to_string(), parsed);
            }
        }

        unset_extra(&mut rows, &params.options.output, &[MODULE.pk]);

        Ok(finalize(rows, params.options.preservekeys))
    }

    pub fn create(&self, user: &ApiUser, items: Vec<serde_json::Value>) -> ApiResult<Vec<i64>> {
        require_role(user, Role::SuperAdmin)?;

        let rule = Rule::Objects {
            fields: vec![
                Field::required("id", Rule::Str { max_len: 255, not_empty: true }),
                Field::required("relative_path", Rule::Str { max_len: 255, not_empty: true }),
                Field::with_default("status", Rule::In(vec![0, 1]), json!(0)),
                Field::with_default("config", Rule::Any, json!([])),
            ],
            uniq_by: vec!["relative_path"],
        };
        let mut items = serde_json::Value::Array(items);
        check(&rule, &mut items, "/")?;
        let items = items.as_array().cloned().unwrap_or_default();

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut ids = Vec::with_capacity(items.len());
            let mut entries = Vec::with_capacity(items.len());

            for (idx, item) in items.iter().enumerate() {
                let relative_path = item["relative_path"].as_str().unwrap_or_default();
                assert_path_unused(tx, relative_path, None, idx)?;

                tx.execute(
                    "INSERT INTO module (id, relative_path, status, config) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        item["id"].as_str().unwrap_or_default(),
                        relative_path,
                        item["status"].as_i64().unwrap_or(0),
                        to_json(&item["config"]),
                    ],
                )?;
                let moduleid = tx.last_insert_rowid();
                ids.push(moduleid);

                entries.push(AuditEntry::added(
                    moduleid,
                    relative_path,
                    snapshot(tx, moduleid)?,
                ));
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Add,
                AuditResource::Module,
                &entries,
            )?;

            Ok(ids)
        })
    }

    pub fn update(&self, user: &ApiUser, items: Vec<serde_json::Value>) -> ApiResult<Vec<i64>> {
        require_role(user, Role::SuperAdmin)?;

        let rule = Rule::Objects {
            fields: vec![
                Field::required("moduleid", Rule::Id),
                Field::optional("id", Rule::Str { max_len: 255, not_empty: true }),
                Field::optional("relative_path", Rule::Str { max_len: 255, not_empty: true }),
                Field::optional("status", Rule::In(vec![0, 1])),
                Field::optional("config", Rule::Any),
            ],
            uniq_by: vec!["moduleid"],
        };
        let mut items = serde_json::Value::Array(items);
        check(&rule, &mut items, "/")?;
        let items = items.as_array().cloned().unwrap_or_default();

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut ids = Vec::with_capacity(items.len());
            let mut entries = Vec::with_capacity(items.len());

            for (idx, item) in items.iter().enumerate() {
                let moduleid = item["moduleid"].as_i64().unwrap_or_default();
                let old = snapshot(tx, moduleid)?;

                if let Some(new_path) = item.get("relative_path").and_then(|v| v.as_str()) {
                    if old["relative_path"].as_str() != Some(new_path) {
                        assert_path_unused(tx, new_path, Some(moduleid), idx)?;
                    }
                }

                let mut sets = Vec::new();
                let mut values: Vec<rusqlite::types::Value> = Vec::new();
                for field in ["id", "relative_path"] {
                    if let Some(value) = item.get(field).and_then(|v| v.as_str()) {
                        sets.push(format!("{field}=?"));
                        values.push(value.to_string().into());
                    }
                }
                if let Some(status) = item.get("status").and_then(|v| v.as_i64()) {
                    sets.push("status=?".to_string());
                    values.push(status.into());
                }
                if let Some(config) = item.get("config") {
                    sets.push("config=?".to_string());
                    values.push(to_json(config).into());
                }

                if !sets.is_empty() {
                    values.push(moduleid.into());
                    tx.execute(
                        &format!(
                            "UPDATE module SET {} WHERE moduleid=?",
                            sets.join(",")
                        ),
                        rusqlite::params_from_iter(values),
                    )?;
                }

                let new = snapshot(tx, moduleid)?;
                let name = new["relative_path"].as_str().unwrap_or_default().to_string();
                entries.push(AuditEntry::updated(moduleid, name, old, new));
                ids.push(moduleid);
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Update,
                AuditResource::Module,
                &entries,
            )?;

            Ok(ids)
        })
    }

    pub fn delete(&self, user: &ApiUser, moduleids: Vec<i64>) -> ApiResult<Vec<i64>> {
        require_role(user, Role::SuperAdmin)?;
        if moduleids.is_empty() {
            return Err(ApiError::parameter("/", "cannot be empty."));
        }

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut entries = Vec::with_capacity(moduleids.len());

            for &moduleid in &moduleids {
                let old = snapshot(tx, moduleid)?;
                let name = old["relative_path"].as_str().unwrap_or_default().to_string();
                tx.execute("DELETE FROM module WHERE moduleid=?1", params![moduleid])?;
                entries.push(AuditEntry::deleted(moduleid, name, old));
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Delete,
                AuditResource::Module,
                &entries,
            )?;

            Ok(moduleids.clone())
        })
    }
}

/// Loads the stored row; a missing id turns into the shared permission error.
fn snapshot(tx: &Transaction, moduleid: i64) -> ApiResult<Row> {
    let mut stmt = tx.prepare(
        "SELECT moduleid, id, relative_path, status, config FROM module WHERE moduleid=?1",
    )?;
    let mut rows = stmt.query_map(params![moduleid], |row| {
        let mut out = Row::new();
        for (idx, field) in ["moduleid", "id", "relative_path", "status", "config"]
            .iter()
            .enumerate()
        {
            out.insert(field.to_string(), value_ref_to_json(row.get_ref(idx)?));
        }
        Ok(out)
    })?;

    match rows.next() {
        Some(row) => Ok(row?),
        None => Err(ApiError::no_permission()),
    }
}

fn assert_path_unused(
    tx: &Transaction,
    relative_path: &str,
    exclude: Option<i64>,
    idx: usize,
) -> ApiResult<()> {
    let count: i64 = match exclude {
        Some(moduleid) => tx.query_row(
            "SELECT COUNT(*) FROM module WHERE relative_path=?1 AND moduleid!=?2",
            params![relative_path, moduleid],
            |row| row.get(0),
        )?,
        None => tx.query_row(
            "SELECT COUNT(*) FROM module WHERE relative_path=?1",
            params![relative_path],
            |row| row.get(0),
        )?,
    };

    if count > 0 {
        return Err(ApiError::parameter(
            format!("/{}/relative_path", idx + 1),
            format!("value \"{relative_path}\" already exists."),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{admin, super_admin, test_api};

    #[test]
    fn test_create_and_get_roundtrip() {
        let api = test_api();

        let ids = api
            .modules()
            .create(
                &super_admin(),
                vec![json!({
                    "id": "widget-clock",
                    "relative_path": "widgets/clock",
                    "config": { "refresh": 30 }
                })],
            )
            .unwrap();
        assert_eq!(ids.len(), 1);

        let rows = api
            .modules()
            .get(
                &super_admin(),
                ModuleGet {
                    moduleids: Some(ids.clone()),
                    ..Default::default()
                },
            )
            .unwrap()
            .rows();

        assert_eq!(rows[0]["relative_path"], "widgets/clock");
        assert_eq!(rows[0]["status"], 0);
        assert_eq!(rows[0]["config"]["refresh"], 30);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let api = test_api();

        api.modules()
            .create(
                &super_admin(),
                vec![json!({ "id": "a", "relative_path": "widgets/clock" })],
            )
            .unwrap();

        let err = api
            .modules()
            .create(
                &super_admin(),
                vec![json!({ "id": "b", "relative_path": "widgets/clock" })],
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/1/relative_path\": value \"widgets/clock\" already exists."
        );

        // Duplicate within one batch is caught before any write.
        let err = api
            .modules()
            .create(
                &super_admin(),
                vec![
                    json!({ "id": "c", "relative_path": "widgets/map" }),
                    json!({ "id": "d", "relative_path": "widgets/map" }),
                ],
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/2\": value (relative_path)=(widgets/map) already exists."
        );
    }

    #[test]
    fn test_update_diffs_and_audits() {
        let api = test_api();

        let ids = api
            .modules()
            .create(
                &super_admin(),
                vec![json!({ "id": "a", "relative_path": "widgets/clock" })],
            )
            .unwrap();

        api.modules()
            .update(
                &super_admin(),
                vec![json!({ "moduleid": ids[0], "status": 1 })],
            )
            .unwrap();

        let conn = api.db().conn.lock().unwrap();
        let (old_value, new_value): (String, String) = conn
            .query_row(
                "SELECT oldvalue, newvalue FROM auditlog_details WHERE field_name='status'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(old_value, "0");
        assert_eq!(new_value, "1");
    }

    #[test]
    fn test_delete_unknown_module() {
        let api = test_api();

        let err = api.modules().delete(&super_admin(), vec![99]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No permissions to referenced object or it does not exist!"
        );
    }

    #[test]
    fn test_mutations_require_super_admin() {
        let api = test_api();

        let err = api
            .modules()
            .create(
                &admin(vec![]),
                vec![json!({ "id": "a", "relative_path": "widgets/clock" })],
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::Permission(_)));

        // get short-circuits to empty instead of erroring.
        let rows = api
            .modules()
            .get(&admin(vec![]), ModuleGet::default())
            .unwrap()
            .rows();
        assert!(rows.is_empty());
    }
}

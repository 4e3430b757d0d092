//! Value map management.
//!
//! Value maps belong to hosts, so visibility and editability follow the
//! caller's host-group rights. Mappings are a child collection diffed by
//! their `value` key on update.

use argus_db::{helpers::value_ref_to_json, Row};
use rusqlite::{params, Transaction};

use crate::{
    audit::{self, AuditAction, AuditEntry, AuditResource},
    error::{ApiError, ApiResult},
    options::{GetOptions, GetResult, SelectRelated},
    output::{finalize, unset_extra},
    permission::{assert_writable_hosts, host_rights_cond, PERM_READ, PERM_READ_WRITE},
    query::{
        apply_filter, apply_output, apply_search, apply_sort, base_query, fetch_keyed,
        id_condition, EntityDef,
    },
    relation::{merge_children, merge_counts, related_counts},
    user::ApiUser,
    validate::{check, Field, Rule},
    Api,
};

const VALUEMAP: EntityDef = EntityDef {
    table: "valuemap",
    alias: "vm",
    pk: "valuemapid",
    fields: &["valuemapid", "hostid", "name"],
    search_fields: &["name"],
    sort_columns: &["valuemapid", "name"],
};

const MAPPING: EntityDef = EntityDef {
    table: "valuemap_mapping",
    alias: "vmm",
    pk: "valuemap_mappingid",
    fields: &["value", "newvalue", "sortorder"],
    search_fields: &[],
    sort_columns: &[],
};

#[derive(Debug, Default)]
pub struct ValueMapGet {
    pub valuemapids: Option<Vec<i64>>,
    pub hostids: Option<Vec<i64>>,
    /// Attach mappings (or their count) under `mappings`.
    pub select_mappings: Option<SelectRelated>,
    /// Per-parent cap on attached mappings.
    pub limit_selects: Option<u32>,
    pub options: GetOptions,
}

pub struct ValueMapApi<'a> {
    pub(crate) api: &'a Api,
}

impl ValueMapApi<'_> {
    pub fn get(&self, user: &ApiUser, params: ValueMapGet) -> ApiResult<GetResult> {
        params.options.validate(&VALUEMAP)?;
        if let Some(SelectRelated::Fields(fields)) = &params.select_mappings {
            for field in fields {
                if !MAPPING.fields.contains(&field.as_str()) {
                    return Err(ApiError::parameter(
                        "/selectMappings",
                        format!("value \"{field}\" is not allowed."),
                    ));
                }
            }
        }

        let mut query = base_query(&self.api.db, &VALUEMAP);

        if !user.is_super_admin() {
            query = query.filter(host_rights_cond("vm.hostid", user, PERM_READ));
        }

        if let Some(ids) = &params.valuemapids {
            query = query.cond("valuemapids", id_condition(&VALUEMAP.pk_col(), ids));
        }

        if let Some(ids) = &params.hostids {
            query = query.cond("hostids", id_condition(&VALUEMAP.col("hostid"), ids));
        }

        if let Some(filter) = &params.options.filter {
            query = apply_filter(query, VALUEMAP.alias, VALUEMAP.fields, filter);
        }

        if let Some(search) = &params.options.search {
            query = apply_search(
                query,
                VALUEMAP.alias,
                VALUEMAP.search_fields,
                search,
                &params.options,
            );
        }

        if params.options.count_output {
            return Ok(GetResult::Count(query.count_distinct(&VALUEMAP.pk_col())?));
        }

        query = apply_output(query, &VALUEMAP, &params.options.output, &[]);
        query = apply_sort(query, &VALUEMAP, &params.options);
        query = query.limit(params.options.limit.unwrap_or(self.api.config.search_limit));

        let mut rows = fetch_keyed(query, &VALUEMAP)?;

        match &params.select_mappings {
            Some(SelectRelated::Count) => {
                let ids: Vec<i64> = rows.keys().copied().collect();
                let counts = related_counts(&self.api.db, MAPPING.table, "valuemapid", &ids)?;
                merge_counts(&mut rows, &counts, "mappings");
            }
            Some(select) => {
                let ids: Vec<i64> = rows.keys().copied().collect();
                let fields: Vec<&str> = match select {
                    SelectRelated::Fields(fields) => {
                        fields.iter().map(String::as_str).collect()
                    }
                    _ => MAPPING.fields.to_vec(),
                };

                let mut child_query = base_query(&self.api.db, &MAPPING)
                    .cond("valuemapids", id_condition(&MAPPING.col("valuemapid"), &ids))
                    .column(MAPPING.col("valuemapid"))
                    .column(MAPPING.col("sortorder"))
                    .column(MAPPING.col("value"));
                for field in &fields {
                    child_query = child_query.column(MAPPING.col(field));
                }

                let mappings = fetch_keyed(child_query, &MAPPING)?;

                let strip: Vec<&str> = [MAPPING.pk, "valuemapid", "sortorder", "value"]
                    .into_iter()
                    .filter(|f| !fields.contains(f))
                    .collect();
                merge_children(
                    &mut rows,
                    &mappings,
                    "valuemapid",
                    "mappings",
                    &["sortorder", "value"],
                    params.limit_selects.map(|n| n as usize),
                    &strip,
                );
            }
            None => {}
        }

        unset_extra(&mut rows, &params.options.output, &[VALUEMAP.pk]);

        Ok(finalize(rows, params.options.preservekeys))
    }

    pub fn create(&self, user: &ApiUser, items: Vec<serde_json::Value>) -> ApiResult<Vec<i64>> {
        let rule = Rule::Objects {
            fields: vec![
                Field::required("hostid", Rule::Id),
                Field::required("name", Rule::Str { max_len: 64, not_empty: true }),
                Field::required("mappings", mappings_rule()),
            ],
            uniq_by: vec!["hostid", "name"],
        };
        let mut items = serde_json::Value::Array(items);
        check(&rule, &mut items, "/")?;
        let items = items.as_array().cloned().unwrap_or_default();

        let hostids: Vec<i64> = items
            .iter()
            .filter_map(|item| item["hostid"].as_i64())
            .collect();
        assert_writable_hosts(&self.api.db, user, &hostids)?;

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut ids = Vec::with_capacity(items.len());
            let mut entries = Vec::with_capacity(items.len());

            for item in &items {
                let hostid = item["hostid"].as_i64().unwrap_or_default();
                let name = item["name"].as_str().unwrap_or_default();
                assert_name_unused(tx, hostid, name, None)?;

                tx.execute(
                    "INSERT INTO valuemap (hostid, name) VALUES (?1, ?2)",
                    params![hostid, name],
                )?;
                let valuemapid = tx.last_insert_rowid();

                if let Some(mappings) = item["mappings"].as_array() {
                    insert_mappings(tx, valuemapid, mappings)?;
                }

                ids.push(valuemapid);
                entries.push(AuditEntry::added(
                    valuemapid,
                    name,
                    snapshot(tx, valuemapid)?,
                ));
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Add,
                AuditResource::ValueMap,
                &entries,
            )?;

            Ok(ids)
        })
    }

    pub fn update(&self, user: &ApiUser, items: Vec<serde_json::Value>) -> ApiResult<Vec<i64>> {
        let rule = Rule::Objects {
            fields: vec![
                Field::required("valuemapid", Rule::Id),
                Field::optional("name", Rule::Str { max_len: 64, not_empty: true }),
                Field::optional("mappings", mappings_rule()),
            ],
            uniq_by: vec!["valuemapid"],
        };
        let mut items = serde_json::Value::Array(items);
        check(&rule, &mut items, "/")?;
        let items = items.as_array().cloned().unwrap_or_default();

        let valuemapids: Vec<i64> = items
            .iter()
            .filter_map(|item| item["valuemapid"].as_i64())
            .collect();
        let stored = self.assert_editable(user, &valuemapids)?;

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut ids = Vec::with_capacity(items.len());
            let mut entries = Vec::with_capacity(items.len());

            for item in &items {
                let valuemapid = item["valuemapid"].as_i64().unwrap_or_default();
                let old = snapshot(tx, valuemapid)?;
                let hostid = stored
                    .get(&valuemapid)
                    .and_then(|row| row.get("hostid"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or_default();

                if let Some(name) = item.get("name").and_then(|v| v.as_str()) {
                    if old["name"].as_str() != Some(name) {
                        assert_name_unused(tx, hostid, name, Some(valuemapid))?;
                        tx.execute(
                            "UPDATE valuemap SET name=?1 WHERE valuemapid=?2",
                            params![name, valuemapid],
                        )?;
                    }
                }

                if let Some(mappings) = item.get("mappings").and_then(|v| v.as_array()) {
                    diff_mappings(tx, valuemapid, mappings)?;
                }

                let new = snapshot(tx, valuemapid)?;
                let name = new["name"].as_str().unwrap_or_default().to_string();
                entries.push(AuditEntry::updated(valuemapid, name, old, new));
                ids.push(valuemapid);
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Update,
                AuditResource::ValueMap,
                &entries,
            )?;

            Ok(ids)
        })
    }

    pub fn delete(&self, user: &ApiUser, valuemapids: Vec<i64>) -> ApiResult<Vec<i64>> {
        if valuemapids.is_empty() {
            return Err(ApiError::parameter("/", "cannot be empty."));
        }
        self.assert_editable(user, &valuemapids)?;

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut entries = Vec::with_capacity(valuemapids.len());

            for &valuemapid in &valuemapids {
                let old = snapshot(tx, valuemapid)?;
                let name = old["name"].as_str().unwrap_or_default().to_string();
                tx.execute(
                    "DELETE FROM valuemap_mapping WHERE valuemapid=?1",
                    params![valuemapid],
                )?;
                tx.execute(
                    "DELETE FROM valuemap WHERE valuemapid=?1",
                    params![valuemapid],
                )?;
                entries.push(AuditEntry::deleted(valuemapid, name, old));
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Delete,
                AuditResource::ValueMap,
                &entries,
            )?;

            Ok(valuemapids.clone())
        })
    }

    /// Confirms all ids exist and are writable for the caller; missing and
    /// forbidden collapse into the same error. Returns the stored rows.
    fn assert_editable(
        &self,
        user: &ApiUser,
        valuemapids: &[i64],
    ) -> ApiResult<indexmap::IndexMap<i64, Row>> {
        let mut uniq = valuemapids.to_vec();
        uniq.sort_unstable();
        uniq.dedup();

        let mut query = base_query(&self.api.db, &VALUEMAP)
            .column(VALUEMAP.col("hostid"))
            .column(VALUEMAP.col("name"))
            .cond("valuemapids", id_condition(&VALUEMAP.pk_col(), &uniq));
        if !user.is_super_admin() {
            query = query.filter(host_rights_cond("vm.hostid", user, PERM_READ_WRITE));
        }

        let rows = fetch_keyed(query, &VALUEMAP)?;
        if rows.len() != uniq.len() {
            return Err(ApiError::no_permission());
        }
        Ok(rows)
    }
}

fn mappings_rule() -> Rule {
    Rule::Objects {
        fields: vec![
            Field::required("value", Rule::Str { max_len: 64, not_empty: false }),
            Field::required("newvalue", Rule::Str { max_len: 64, not_empty: true }),
            Field::optional("sortorder", Rule::Int { min: 0, max: 999 }),
        ],
        uniq_by: vec!["value"],
    }
}

fn insert_mappings(
    tx: &Transaction,
    valuemapid: i64,
    mappings: &[serde_json::Value],
) -> ApiResult<()> {
    for (idx, mapping) in mappings.iter().enumerate() {
        tx.execute(
            "INSERT INTO valuemap_mapping (valuemapid, value, newvalue, sortorder) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                valuemapid,
                mapping["value"].as_str().unwrap_or_default(),
                mapping["newvalue"].as_str().unwrap_or_default(),
                mapping
                    .get("sortorder")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(idx as i64),
            ],
        )?;
    }
    Ok(())
}

/// Reconciles stored mappings with the requested set, keyed by `value`:
/// new keys insert, changed keys update, absent keys delete.
fn diff_mappings(
    tx: &Transaction,
    valuemapid: i64,
    mappings: &[serde_json::Value],
) -> ApiResult<()> {
    let mut stmt = tx.prepare(
        "SELECT valuemap_mappingid, value, newvalue, sortorder \
         FROM valuemap_mapping WHERE valuemapid=?1",
    )?;
    let stored: Vec<(i64, String, String, i64)> = stmt
        .query_map(params![valuemapid], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    let mut keep = Vec::with_capacity(mappings.len());
    for (idx, mapping) in mappings.iter().enumerate() {
        let value = mapping["value"].as_str().unwrap_or_default();
        let newvalue = mapping["newvalue"].as_str().unwrap_or_default();
        let sortorder = mapping
            .get("sortorder")
            .and_then(|v| v.as_i64())
            .unwrap_or(idx as i64);
        keep.push(value.to_string());

        match stored.iter().find(|(_, v, _, _)| v == value) {
            Some((mappingid, _, old_newvalue, old_sortorder)) => {
                if old_newvalue != newvalue || *old_sortorder != sortorder {
                    tx.execute(
                        "UPDATE valuemap_mapping SET newvalue=?1, sortorder=?2 \
                         WHERE valuemap_mappingid=?3",
                        params![newvalue, sortorder, mappingid],
                    )?;
                }
            }
            None => {
                tx.execute(
                    "INSERT INTO valuemap_mapping (valuemapid, value, newvalue, sortorder) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![valuemapid, value, newvalue, sortorder],
                )?;
            }
        }
    }

    for (mappingid, value, _, _) in &stored {
        if !keep.contains(value) {
            tx.execute(
                "DELETE FROM valuemap_mapping WHERE valuemap_mappingid=?1",
                params![mappingid],
            )?;
        }
    }

    Ok(())
}

fn snapshot(tx: &Transaction, valuemapid: i64) -> ApiResult<Row> {
    let mut stmt =
        tx.prepare("SELECT valuemapid, hostid, name FROM valuemap WHERE valuemapid=?1")?;
    let mut rows = stmt.query_map(params![valuemapid], |row| {
        let mut out = Row::new();
        for (idx, field) in ["valuemapid", "hostid", "name"].iter().enumerate() {
            out.insert(field.to_string(), value_ref_to_json(row.get_ref(idx)?));
        }
        Ok(out)
    })?;

    match rows.next() {
        Some(row) => Ok(row?),
        None => Err(ApiError::no_permission()),
    }
}

fn assert_name_unused(
    tx: &Transaction,
    hostid: i64,
    name: &str,
    exclude: Option<i64>,
) -> ApiResult<()> {
    let count: i64 = match exclude {
        Some(valuemapid) => tx.query_row(
            "SELECT COUNT(*) FROM valuemap WHERE hostid=?1 AND name=?2 AND valuemapid!=?3",
            params![hostid, name, valuemapid],
            |row| row.get(0),
        )?,
        None => tx.query_row(
            "SELECT COUNT(*) FROM valuemap WHERE hostid=?1 AND name=?2",
            params![hostid, name],
            |row| row.get(0),
        )?,
    };

    if count > 0 {
        return Err(ApiError::parameter(
            "/name",
            format!("Value map \"{name}\" already exists."),
        ));
    }
    Ok(())
}

//! API token management.
//!
//! Callers below super admin only ever see and touch their own tokens. The
//! secret column is write-only: it is absent from the output allow-list and
//! masked in the audit trail.

use argus_db::{expr::RawSql, helpers::value_ref_to_json, Row};
use rusqlite::{params, types::Value, Transaction};
use serde_json::json;

use crate::{
    audit::{self, AuditAction, AuditEntry, AuditResource},
    error::{ApiError, ApiResult},
    options::{GetOptions, GetResult},
    output::{finalize, unset_extra},
    query::{
        apply_filter, apply_output, apply_search, apply_sort, base_query, fetch_keyed,
        id_condition, EntityDef,
    },
    user::ApiUser,
    validate::{check, Field, Rule},
    Api,
};

const TOKEN: EntityDef = EntityDef {
    table: "token",
    alias: "t",
    pk: "tokenid",
    fields: &[
        "tokenid",
        "name",
        "description",
        "userid",
        "lastaccess",
        "status",
        "expires_at",
        "created_at",
        "creator_userid",
    ],
    search_fields: &["name", "description"],
    sort_columns: &["tokenid", "name", "lastaccess", "expires_at", "created_at"],
};

const SNAPSHOT_FIELDS: &[&str] = &[
    "tokenid",
    "name",
    "description",
    "userid",
    "status",
    "expires_at",
];

#[derive(Debug, Default)]
pub struct TokenGet {
    pub tokenids: Option<Vec<i64>>,
    pub userids: Option<Vec<i64>>,
    /// Only tokens usable at this timestamp (unexpired or non-expiring).
    pub valid_at: Option<i64>,
    pub options: GetOptions,
}

pub struct TokenApi<'a> {
    pub(crate) api: &'a Api,
}

impl TokenApi<'_> {
    pub fn get(&self, user: &ApiUser, params: TokenGet) -> ApiResult<GetResult> {
        params.options.validate(&TOKEN)?;

        let mut query = base_query(&self.api.db, &TOKEN);

        if !user.is_super_admin() {
            query = query.cond(
                "own",
                RawSql::new("t.userid=?", vec![Value::Integer(user.userid)]),
            );
        }

        if let Some(ids) = &params.tokenids {
            query = query.cond("tokenids", id_condition(&TOKEN.pk_col(), ids));
        }

        if let Some(ids) = &params.userids {
            query = query.cond("userids", id_condition(&TOKEN.col("userid"), ids));
        }

        if let Some(valid_at) = params.valid_at {
            query = query.cond(
                "valid_at",
                RawSql::new(
                    "(t.expires_at=0 OR t.expires_at>?)",
                    vec![Value::Integer(valid_at)],
                ),
            );
        }

        if let Some(filter) = &params.options.filter {
            query = apply_filter(query, TOKEN.alias, TOKEN.fields, filter);
        }

        if let Some(search) = &params.options.search {
            query = apply_search(
                query,
                TOKEN.alias,
                TOKEN.search_fields,
                search,
                &params.options,
            );
        }

        if params.options.count_output {
            return Ok(GetResult::Count(query.count_distinct(&TOKEN.pk_col())?));
        }

        query = apply_output(query, &TOKEN, &params.options.output, &[]);
        query = apply_sort(query, &TOKEN, &params.options);
        query = query.limit(params.options.limit.unwrap_or(self.api.config.search_limit));

        let mut rows = fetch_keyed(query, &TOKEN)?;
        unset_extra(&mut rows, &params.options.output, &[TOKEN.pk]);

        Ok(finalize(rows, params.options.preservekeys))
    }

    pub fn create(&self, user: &ApiUser, items: Vec<serde_json::Value>) -> ApiResult<Vec<i64>> {
        let rule = Rule::Objects {
            fields: vec![
                Field::required("name", Rule::Str { max_len: 64, not_empty: true }),
                Field::with_default(
                    "description",
                    Rule::Str { max_len: 255, not_empty: false },
                    json!(""),
                ),
                Field::with_default("userid", Rule::Id, json!(user.userid)),
                Field::with_default("status", Rule::In(vec![0, 1]), json!(0)),
                Field::with_default("expires_at", Rule::Int { min: 0, max: i64::MAX }, json!(0)),
            ],
            uniq_by: vec!["userid", "name"],
        };
        let mut items = serde_json::Value::Array(items);
        check(&rule, &mut items, "/")?;
        let items = items.as_array().cloned().unwrap_or_default();

        // Only super admins may manage other users' tokens.
        if !user.is_super_admin()
            && items
                .iter()
                .any(|item| item["userid"].as_i64() != Some(user.userid))
        {
            return Err(ApiError::no_permission());
        }

        let created_at = chrono::Utc::now().timestamp();

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut ids = Vec::with_capacity(items.len());
            let mut entries = Vec::with_capacity(items.len());

            for item in &items {
                let name = item["name"].as_str().unwrap_or_default();
                let userid = item["userid"].as_i64().unwrap_or_default();
                assert_name_unused(tx, userid, name, None)?;

                tx.execute(
                    "INSERT INTO token \
                     (name, description, userid, status, expires_at, created_at, creator_userid) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        name,
                        item["description"].as_str().unwrap_or_default(),
                        userid,
                        item["status"].as_i64().unwrap_or(0),
                        item["expires_at"].as_i64().unwrap_or(0),
                        created_at,
                        user.userid,
                    ],
                )?;
                let tokenid = tx.last_insert_rowid();
                ids.push(tokenid);
                entries.push(AuditEntry::added(tokenid, name, snapshot(tx, tokenid)?));
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Add,
                AuditResource::AuthToken,
                &entries,
            )?;

            Ok(ids)
        })
    }

    pub fn update(&self, user: &ApiUser, items: Vec<serde_json::Value>) -> ApiResult<Vec<i64>> {
        let rule = Rule::Objects {
            fields: vec![
                Field::required("tokenid", Rule::Id),
                Field::optional("name", Rule::Str { max_len: 64, not_empty: true }),
                Field::optional("description", Rule::Str { max_len: 255, not_empty: false }),
                Field::optional("status", Rule::In(vec![0, 1])),
                Field::optional("expires_at", Rule::Int { min: 0, max: i64::MAX }),
            ],
            uniq_by: vec!["tokenid"],
        };
        let mut items = serde_json::Value::Array(items);
        check(&rule, &mut items, "/")?;
        let items = items.as_array().cloned().unwrap_or_default();

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut ids = Vec::with_capacity(items.len());
            let mut entries = Vec::with_capacity(items.len());

            for item in &items {
                let tokenid = item["tokenid"].as_i64().unwrap_or_default();
                let old = snapshot(tx, tokenid)?;
                let userid = old["userid"].as_i64().unwrap_or_default();

                if !user.is_super_admin() && userid != user.userid {
                    return Err(ApiError::no_permission());
                }

                if let Some(name) = item.get("name").and_then(|v| v.as_str()) {
                    if old["name"].as_str() != Some(name) {
                        assert_name_unused(tx, userid, name, Some(tokenid))?;
                    }
                }

                let mut sets = Vec::new();
                let mut values: Vec<Value> = Vec::new();
                for field in ["name", "description"] {
                    if let Some(value) = item.get(field).and_then(|v| v.as_str()) {
                        sets.push(format!("{field}=?"));
                        values.push(value.to_string().into());
                    }
                }
                for field in ["status", "expires_at"] {
                    if let Some(value) = item.get(field).and_then(|v| v.as_i64()) {
                        sets.push(format!("{field}=?"));
                        values.push(value.into());
                    }
                }

                if !sets.is_empty() {
                    values.push(tokenid.into());
                    tx.execute(
                        &format!("UPDATE token SET {} WHERE tokenid=?", sets.join(",")),
                        rusqlite::params_from_iter(values),
                    )?;
                }

                let new = snapshot(tx, tokenid)?;
                let name = new["name"].as_str().unwrap_or_default().to_string();
                entries.push(AuditEntry::updated(tokenid, name, old, new));
                ids.push(tokenid);
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Update,
                AuditResource::AuthToken,
                &entries,
            )?;

            Ok(ids)
        })
    }

    pub fn delete(&self, user: &ApiUser, tokenids: Vec<i64>) -> ApiResult<Vec<i64>> {
        if tokenids.is_empty() {
            return Err(ApiError::parameter("/", "cannot be empty."));
        }

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let mut entries = Vec::with_capacity(tokenids.len());

            for &tokenid in &tokenids {
                let old = snapshot(tx, tokenid)?;
                if !user.is_super_admin()
                    && old["userid"].as_i64() != Some(user.userid)
                {
                    return Err(ApiError::no_permission());
                }
                let name = old["name"].as_str().unwrap_or_default().to_string();
                tx.execute("DELETE FROM token WHERE tokenid=?1", params![tokenid])?;
                entries.push(AuditEntry::deleted(tokenid, name, old));
            }

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Delete,
                AuditResource::AuthToken,
                &entries,
            )?;

            Ok(tokenids.clone())
        })
    }
}

fn snapshot(tx: &Transaction, tokenid: i64) -> ApiResult<Row> {
    let sql = format!(
        "SELECT {} FROM token WHERE tokenid=?1",
        SNAPSHOT_FIELDS.join(",")
    );
    let mut stmt = tx.prepare(&sql)?;
    let mut rows = stmt.query_map(params![tokenid], |row| {
        let mut out = Row::new();
        for (idx, field) in SNAPSHOT_FIELDS.iter().enumerate() {
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
    userid: i64,
    name: &str,
    exclude: Option<i64>,
) -> ApiResult<()> {
    let count: i64 = match exclude {
        Some(tokenid) => tx.query_row(
            "SELECT COUNT(*) FROM token WHERE userid=?1 AND name=?2 AND tokenid!=?3",
            params![userid, name, tokenid],
            |row| row.get(0),
        )?,
        None => tx.query_row(
            "SELECT COUNT(*) FROM token WHERE userid=?1 AND name=?2",
            params![userid, name],
            |row| row.get(0),
        )?,
    };

    if count > 0 {
        return Err(ApiError::parameter(
            "/name",
            format!("API token \"{name}\" already exists for userid \"{userid}\"."),
        ));
    }
    Ok(())
}

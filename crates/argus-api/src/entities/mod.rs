//! One service per entity.

use argus_db::{helpers::json_to_value, helpers::value_ref_to_json, Row};
use rusqlite::Transaction;

use crate::{
    audit::{self, AuditAction, AuditEntry, AuditResource},
    error::{ApiError, ApiResult},
    options::Output,
    permission::require_role,
    user::{ApiUser, Role},
    validate::{check, Rule},
    Api,
};

pub mod auditlog;
pub mod authentication;
pub mod autoregistration;
pub mod dcheck;
pub mod graphitem;
pub mod hanode;
pub mod housekeeping;
pub mod module;
pub mod settings;
pub mod token;
pub mod valuemap;

/// Reads the given fields of the `config` singleton row.
pub(crate) fn fetch_config_row(tx: &Transaction, fields: &[&str]) -> ApiResult<Row> {
    let sql = format!("SELECT {} FROM config WHERE configid=1", fields.join(","));
    let mut stmt = tx.prepare(&sql)?;
    let row = stmt.query_row([], |row| {
        let mut out = Row::new();
        for (idx, field) in fields.iter().enumerate() {
            out.insert(field.to_string(), value_ref_to_json(row.get_ref(idx)?));
        }
        Ok(out)
    })?;
    Ok(row)
}

/// Writes changed fields back to the `config` singleton row.
pub(crate) fn update_config_fields(tx: &Transaction, delta: &Row) -> ApiResult<()> {
    if delta.is_empty() {
        return Ok(());
    }
    let sets = delta
        .keys()
        .map(|field| format!("{field}=?"))
        .collect::<Vec<_>>()
        .join(",");
    let params: Vec<rusqlite::types::Value> = delta.values().map(json_to_value).collect();
    tx.execute(
        &format!("UPDATE config SET {sets} WHERE configid=1"),
        rusqlite::params_from_iter(params),
    )?;
    Ok(())
}

/// Shared `get` for the `config`-singleton entities (settings, housekeeping,
/// authentication): returns the requested subset of the singleton row.
pub(crate) fn get_config_entity(
    api: &Api,
    user: &ApiUser,
    fields: &'static [&'static str],
    output: &Output,
) -> ApiResult<Row> {
    require_role(user, Role::SuperAdmin)?;

    let selected: Vec<&str> = match output {
        Output::Extend => fields.to_vec(),
        Output::Fields(requested) => {
            for field in requested {
                if !fields.contains(&field.as_str()) {
                    return Err(ApiError::parameter(
                        "/output",
                        format!("value \"{field}\" is not allowed."),
                    ));
                }
            }
            requested.iter().map(String::as_str).collect()
        }
    };

    api.db
        .with_transaction::<_, ApiError, _>(|tx| fetch_config_row(tx, &selected))
}

/// Shared `update` for the `config`-singleton entities.
///
/// Validates the change set, diffs it against the stored row, persists only
/// the changed fields, and records one audit entry per call even when
/// nothing changed.
pub(crate) fn update_config_entity(
    api: &Api,
    user: &ApiUser,
    fields: &'static [&'static str],
    rule: &Rule,
    resource: AuditResource,
    resourcename: &str,
    mut changes: serde_json::Value,
) -> ApiResult<Row> {
    require_role(user, Role::SuperAdmin)?;
    check(rule, &mut changes, "/")?;

    let changes = match changes {
        serde_json::Value::Object(map) => map,
        _ => return Err(ApiError::parameter("/", "an object is expected.")),
    };

    api.db.with_transaction::<_, ApiError, _>(|tx| {
        let old = fetch_config_row(tx, fields)?;

        let mut delta = Row::new();
        for (field, value) in &changes {
            if old.get(field) != Some(value) {
                delta.insert(field.clone(), value.clone());
            }
        }

        update_config_fields(tx, &delta)?;

        let mut new = old.clone();
        for (field, value) in &delta {
            new.insert(field.clone(), value.clone());
        }

        audit::record(
            tx,
            &api.config,
            user,
            AuditAction::Update,
            resource,
            &[AuditEntry::updated(1, resourcename, old, new.clone())],
        )?;

        Ok(new)
    })
}

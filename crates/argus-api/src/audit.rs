//! Recording of mutation audit trails.

use std::sync::atomic::{AtomicU64, Ordering};

use argus_db::Row;
use rusqlite::{params, Transaction};
use tracing::debug;

use crate::{config::ApiConfig, error::ApiResult, user::ApiUser, validate::scalar_to_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Add = 0,
    Update = 1,
    Delete = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditResource {
    ValueMap = 17,
    Module = 39,
    Settings = 40,
    Housekeeping = 41,
    Authentication = 42,
    Autoregistration = 43,
    AuthToken = 45,
    HaNode = 47,
}

impl AuditResource {
    fn table_name(self) -> &'static str {
        match self {
            AuditResource::ValueMap => "valuemap",
            AuditResource::Module => "module",
            AuditResource::Settings
            | AuditResource::Housekeeping
            | AuditResource::Authentication => "config",
            AuditResource::Autoregistration => "config_autoreg_tls",
            AuditResource::AuthToken => "token",
            AuditResource::HaNode => "ha_node",
        }
    }

    /// Secret fields whose values never reach the audit trail in clear.
    fn masked_fields(self) -> &'static [&'static str] {
        match self {
            AuditResource::AuthToken => &["token"],
            AuditResource::Autoregistration => &["tls_psk"],
            _ => &[],
        }
    }
}

const MASK: &str = "******";

/// Before/after snapshot pair for one touched entity.
#[derive(Debug)]
pub struct AuditEntry {
    pub resourceid: i64,
    pub resourcename: String,
    pub old: Row,
    pub new: Row,
}

impl AuditEntry {
    pub fn added(resourceid: i64, resourcename: impl Into<String>, new: Row) -> Self {
        Self {
            resourceid,
            resourcename: resourcename.into(),
            old: Row::new(),
            new,
        }
    }

    pub fn updated(
        resourceid: i64,
        resourcename: impl Into<String>,
        old: Row,
        new: Row,
    ) -> Self {
        Self {
            resourceid,
            resourcename: resourcename.into(),
            old,
            new,
        }
    }

    pub fn deleted(resourceid: i64, resourcename: impl Into<String>, old: Row) -> Self {
        Self {
            resourceid,
            resourcename: resourcename.into(),
            old,
            new: Row::new(),
        }
    }
}

static RECORDSET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persists one audit record per entry, sharing a recordset id across the
/// whole call. An entry is recorded even when its field delta is empty;
/// per-field detail rows are written only for updates.
pub fn record(
    tx: &Transaction,
    config: &ApiConfig,
    user: &ApiUser,
    action: AuditAction,
    resource: AuditResource,
    entries: &[AuditEntry],
) -> ApiResult<()> {
    if !config.audit_enabled || entries.is_empty() {
        return Ok(());
    }

    let clock = chrono::Utc::now().timestamp();
    let seq = RECORDSET_SEQ.fetch_add(1, Ordering::Relaxed);
    let recordsetid = format!("{clock:x}-{seq:x}");

    for entry in entries {
        tx.execute(
            "INSERT INTO auditlog \
             (userid, username, clock, ip, action, resourcetype, resourceid, resourcename, recordsetid) \
             VALUES (?1, ?2, ?3, '', ?4, ?5, ?6, ?7, ?8)",
            params![
                user.userid,
                user.username,
                clock,
                action as i64,
                resource as i64,
                entry.resourceid,
                entry.resourcename,
                recordsetid,
            ],
        )?;
        let auditid = tx.last_insert_rowid();

        if action == AuditAction::Update {
            for (field, old_value, new_value) in changed_fields(entry, resource) {
                tx.execute(
                    "INSERT INTO auditlog_details \
                     (auditid, table_name, field_name, oldvalue, newvalue) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![auditid, resource.table_name(), field, old_value, new_value],
                )?;
            }
        }
    }

    debug!(
        resource = ?resource,
        action = ?action,
        entries = entries.len(),
        "recorded audit entries"
    );

    Ok(())
}

fn changed_fields(
    entry: &AuditEntry,
    resource: AuditResource,
) -> Vec<(String, String, String)> {
    let masked = resource.masked_fields();
    let mut changes = Vec::new();

    for (field, old_value) in &entry.old {
        let new_value = match entry.new.get(field) {
            Some(v) => v,
            None => continue,
        };
        if old_value == new_value {
            continue;
        }
        if masked.contains(&field.as_str()) {
            changes.push((field.clone(), MASK.to_string(), MASK.to_string()));
        } else {
            changes.push((
                field.clone(),
                scalar_to_string(old_value),
                scalar_to_string(new_value),
            ));
        }
    }

    changes
}

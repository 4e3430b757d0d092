//! Agent autoregistration settings.
//!
//! The accept mask lives on the `config` singleton, the PSK pair on
//! `config_autoreg_tls`. The PSK is write-only: `get` never returns it and
//! the audit trail records it masked.

use argus_db::{helpers::value_ref_to_json, Row};
use rusqlite::params;
use serde_json::json;

use crate::{
    audit::{self, AuditAction, AuditEntry, AuditResource},
    error::{ApiError, ApiResult},
    permission::require_role,
    user::{ApiUser, Role},
    validate::{check, Field, Rule},
    Api,
};

/// Accept-mask bits: plain connections, PSK-secured connections, or both.
pub const TLS_ACCEPT_UNENCRYPTED: i64 = 1;
pub const TLS_ACCEPT_PSK: i64 = 2;

const PSK_MIN_LEN: usize = 32;

fn update_rule() -> Rule {
    Rule::Object(vec![
        Field::optional("tls_accept", Rule::In(vec![1, 2, 3])),
        Field::optional("tls_psk_identity", Rule::Str { max_len: 128, not_empty: false }),
        Field::optional("tls_psk", Rule::Str { max_len: 512, not_empty: false }),
    ])
}

pub struct AutoregistrationApi<'a> {
    pub(crate) api: &'a Api,
}

impl AutoregistrationApi<'_> {
    /// Returns the accept mask. The PSK identity and secret are write-only.
    pub fn get(&self, user: &ApiUser) -> ApiResult<Row> {
        require_role(user, Role::SuperAdmin)?;

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let tls_accept: i64 = tx.query_row(
                "SELECT autoreg_tls_accept FROM config WHERE configid=1",
                [],
                |row| row.get(0),
            )?;
            let mut row = Row::new();
            row.insert("tls_accept".to_string(), json!(tls_accept));
            Ok(row)
        })
    }

    pub fn update(&self, user: &ApiUser, mut changes: serde_json::Value) -> ApiResult<()> {
        require_role(user, Role::SuperAdmin)?;
        check(&update_rule(), &mut changes, "/")?;

        if let Some(psk) = changes.get("tls_psk").and_then(|v| v.as_str()) {
            validate_psk(psk)?;
        }

        let changes = changes.as_object().cloned().unwrap_or_default();

        self.api.db.with_transaction::<_, ApiError, _>(|tx| {
            let old = current_state(tx)?;

            let mut new = old.clone();
            for (field, value) in &changes {
                new.insert(field.clone(), value.clone());
            }

            let accept = new["tls_accept"].as_i64().unwrap_or(TLS_ACCEPT_UNENCRYPTED);
            if accept & TLS_ACCEPT_PSK != 0 {
                if new["tls_psk_identity"].as_str().unwrap_or("").is_empty() {
                    return Err(ApiError::parameter(
                        "/tls_psk_identity",
                        "cannot be empty.",
                    ));
                }
                if new["tls_psk"].as_str().unwrap_or("").is_empty() {
                    return Err(ApiError::parameter("/tls_psk", "cannot be empty."));
                }
            } else {
                // PSK support switched off clears the stored pair.
                new.insert("tls_psk_identity".to_string(), json!(""));
                new.insert("tls_psk".to_string(), json!(""));
            }

            tx.execute(
                "UPDATE config SET autoreg_tls_accept=?1 WHERE configid=1",
                params![accept],
            )?;
            tx.execute(
                "UPDATE config_autoreg_tls SET tls_psk_identity=?1, tls_psk=?2 \
                 WHERE autoreg_tlsid=1",
                params![
                    new["tls_psk_identity"].as_str().unwrap_or(""),
                    new["tls_psk"].as_str().unwrap_or(""),
                ],
            )?;

            audit::record(
                tx,
                &self.api.config,
                user,
                AuditAction::Update,
                AuditResource::Autoregistration,
                &[AuditEntry::updated(1, "Autoregistration", old, new)],
            )?;

            Ok(())
        })
    }
}

fn current_state(tx: &rusqlite::Transaction) -> ApiResult<Row> {
    let mut stmt = tx.prepare(
        "SELECT c.autoreg_tls_accept, t.tls_psk_identity, t.tls_psk \
         FROM config c, config_autoreg_tls t \
         WHERE c.configid=1 AND t.autoreg_tlsid=1",
    )?;
    let row = stmt.query_row([], |row| {
        let mut out = Row::new();
        out.insert("tls_accept".to_string(), value_ref_to_json(row.get_ref(0)?));
        out.insert(
            "tls_psk_identity".to_string(),
            value_ref_to_json(row.get_ref(1)?),
        );
        out.insert("tls_psk".to_string(), value_ref_to_json(row.get_ref(2)?));
        Ok(out)
    })?;
    Ok(row)
}

fn validate_psk(psk: &str) -> ApiResult<()> {
    if psk.is_empty() {
        return Ok(());
    }
    if psk.len() < PSK_MIN_LEN {
        return Err(ApiError::parameter(
            "/tls_psk",
            format!("minimum length is {PSK_MIN_LEN} characters."),
        ));
    }
    if psk.len() % 2 != 0 || !psk.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ApiError::parameter(
            "/tls_psk",
            "an even number of hexadecimal characters is expected.",
        ));
    }
    Ok(())
}

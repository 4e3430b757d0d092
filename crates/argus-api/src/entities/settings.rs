//! UI and server defaults stored on the `config` singleton.

use argus_db::Row;

use crate::{
    audit::AuditResource,
    entities::{get_config_entity, update_config_entity},
    error::ApiResult,
    options::Output,
    user::ApiUser,
    validate::{Field, Rule},
    Api,
};

pub const SETTINGS_FIELDS: &[&str] = &[
    "default_lang",
    "default_theme",
    "search_limit",
    "max_in_table",
    "server_check_interval",
    "work_period",
    "show_technical_errors",
    "history_period",
    "period_default",
    "max_period",
];

fn update_rule() -> Rule {
    Rule::Object(vec![
        Field::optional("default_lang", Rule::Str { max_len: 5, not_empty: true }),
        Field::optional("default_theme", Rule::Str { max_len: 128, not_empty: true }),
        Field::optional("search_limit", Rule::Int { min: 1, max: 999999 }),
        Field::optional("max_in_table", Rule::Int { min: 1, max: 99999 }),
        Field::optional("server_check_interval", Rule::In(vec![0, 10])),
        Field::optional("work_period", Rule::Str { max_len: 255, not_empty: true }),
        Field::optional("show_technical_errors", Rule::In(vec![0, 1])),
        Field::optional("history_period", Rule::TimeUnit { min: 86400, max: 604800 }),
        Field::optional("period_default", Rule::TimeUnit { min: 60, max: 315360000 }),
        Field::optional("max_period", Rule::TimeUnit { min: 31536000, max: 315360000 }),
    ])
}

pub struct SettingsApi<'a> {
    pub(crate) api: &'a Api,
}

impl SettingsApi<'_> {
    /// Returns the requested settings fields; `get` takes only an output
    /// selection.
    pub fn get(&self, user: &ApiUser, output: &Output) -> ApiResult<Row> {
        get_config_entity(self.api, user, SETTINGS_FIELDS, output)
    }

    pub fn update(&self, user: &ApiUser, changes: serde_json::Value) -> ApiResult<Row> {
        update_config_entity(
            self.api,
            user,
            SETTINGS_FIELDS,
            &update_rule(),
            AuditResource::Settings,
            "Settings",
            changes,
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::{admin, super_admin, test_api};

    #[test]
    fn test_get_defaults() {
        let api = test_api();

        let settings = api.settings().get(&super_admin(), &Output::Extend).unwrap();
        assert_eq!(settings["search_limit"], 1000);
        assert_eq!(settings["default_theme"], "blue-theme");

        let subset = api
            .settings()
            .get(
                &super_admin(),
                &Output::Fields(vec!["work_period".into()]),
            )
            .unwrap();
        assert_eq!(subset.len(), 1);
        assert_eq!(subset["work_period"], "1-5,09:00-18:00");
    }

    #[test]
    fn test_update_persists_and_audits() {
        let api = test_api();

        let updated = api
            .settings()
            .update(&super_admin(), json!({ "search_limit": 200 }))
            .unwrap();
        assert_eq!(updated["search_limit"], 200);

        let stored = api.settings().get(&super_admin(), &Output::Extend).unwrap();
        assert_eq!(stored["search_limit"], 200);

        let conn = api.db().conn.lock().unwrap();
        let entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM auditlog", [], |row| row.get(0))
            .unwrap();
        assert_eq!(entries, 1);
        let details: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM auditlog_details WHERE field_name='search_limit'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(details, 1);
    }

    #[test]
    fn test_idempotent_update_records_entry_without_deltas() {
        let api = test_api();

        api.settings()
            .update(&super_admin(), json!({ "search_limit": 1000 }))
            .unwrap();

        let conn = api.db().conn.lock().unwrap();
        let entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM auditlog", [], |row| row.get(0))
            .unwrap();
        assert_eq!(entries, 1);
        let details: i64 = conn
            .query_row("SELECT COUNT(*) FROM auditlog_details", [], |row| row.get(0))
            .unwrap();
        assert_eq!(details, 0);
    }

    #[test]
    fn test_requires_super_admin() {
        let api = test_api();

        assert!(api.settings().get(&admin(vec![]), &Output::Extend).is_err());
        assert!(api
            .settings()
            .update(&admin(vec![]), json!({ "search_limit": 5 }))
            .is_err());
    }

    #[test]
    fn test_validation() {
        let api = test_api();

        let err = api
            .settings()
            .update(&super_admin(), json!({ "search_limit": 0 }))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/search_limit\": value must be one of 1-999999."
        );

        let err = api
            .settings()
            .update(&super_admin(), json!({ "history_period": "1h" }))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/history_period\": value must be one of 86400-604800."
        );

        let err = api
            .settings()
            .update(&super_admin(), json!({ "refresh": "30s" }))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/\": unexpected parameter \"refresh\"."
        );
    }
}

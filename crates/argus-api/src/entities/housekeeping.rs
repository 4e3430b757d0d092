//! Housekeeping retention settings stored on the `config` singleton.

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

pub const HOUSEKEEPING_FIELDS: &[&str] = &[
    "hk_events_mode",
    "hk_events_trigger",
    "hk_events_internal",
    "hk_events_discovery",
    "hk_events_autoreg",
    "hk_services_mode",
    "hk_services",
    "hk_audit_mode",
    "hk_audit",
    "hk_sessions_mode",
    "hk_sessions",
    "hk_history_mode",
    "hk_history_global",
    "hk_history",
    "hk_trends_mode",
    "hk_trends_global",
    "hk_trends",
];

// Retention periods: one day up to 25 years.
const PERIOD_MIN: i64 = 86400;
const PERIOD_MAX: i64 = 788400000;

fn period() -> Rule {
    Rule::TimeUnit {
        min: PERIOD_MIN,
        max: PERIOD_MAX,
    }
}

fn mode() -> Rule {
    Rule::In(vec![0, 1])
}

fn update_rule() -> Rule {
    Rule::Object(vec![
        Field::optional("hk_events_mode", mode()),
        Field::optional("hk_events_trigger", period()),
        Field::optional("hk_events_internal", period()),
        Field::optional("hk_events_discovery", period()),
        Field::optional("hk_events_autoreg", period()),
        Field::optional("hk_services_mode", mode()),
        Field::optional("hk_services", period()),
        Field::optional("hk_audit_mode", mode()),
        Field::optional("hk_audit", period()),
        Field::optional("hk_sessions_mode", mode()),
        Field::optional("hk_sessions", period()),
        Field::optional("hk_history_mode", mode()),
        Field::optional("hk_history_global", mode()),
        Field::optional("hk_history", period()),
        Field::optional("hk_trends_mode", mode()),
        Field::optional("hk_trends_global", mode()),
        Field::optional("hk_trends", period()),
    ])
}

pub struct HousekeepingApi<'a> {
    pub(crate) api: &'a Api,
}

impl HousekeepingApi<'_> {
    pub fn get(&self, user: &ApiUser, output: &Output) -> ApiResult<Row> {
        get_config_entity(self.api, user, HOUSEKEEPING_FIELDS, output)
    }

    pub fn update(&self, user: &ApiUser, changes: serde_json::Value) -> ApiResult<Row> {
        update_config_entity(
            self.api,
            user,
            HOUSEKEEPING_FIELDS,
            &update_rule(),
            AuditResource::Housekeeping,
            "Housekeeping",
            changes,
        )
    }
}

//! Authentication settings stored on the `config` singleton.

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

pub const AUTHENTICATION_FIELDS: &[&str] = &[
    "authentication_type",
    "http_auth_enabled",
    "http_login_form",
    "http_strip_domains",
    "ldap_configured",
    "passwd_min_length",
    "passwd_check_rules",
];

fn update_rule() -> Rule {
    Rule::Object(vec![
        Field::optional("authentication_type", Rule::In(vec![0, 1])),
        Field::optional("http_auth_enabled", Rule::In(vec![0, 1])),
        Field::optional("http_login_form", Rule::In(vec![0, 1])),
        Field::optional("http_strip_domains", Rule::Str { max_len: 2048, not_empty: false }),
        Field::optional("ldap_configured", Rule::In(vec![0, 1])),
        Field::optional("passwd_min_length", Rule::Int { min: 1, max: 70 }),
        // Bitmask of the four password complexity checks.
        Field::optional("passwd_check_rules", Rule::Int { min: 0, max: 15 }),
    ])
}

pub struct AuthenticationApi<'a> {
    pub(crate) api: &'a Api,
}

impl AuthenticationApi<'_> {
    pub fn get(&self, user: &ApiUser, output: &Output) -> ApiResult<Row> {
        get_config_entity(self.api, user, AUTHENTICATION_FIELDS, output)
    }

    pub fn update(&self, user: &ApiUser, changes: serde_json::Value) -> ApiResult<Row> {
        update_config_entity(
            self.api,
            user,
            AUTHENTICATION_FIELDS,
            &update_rule(),
            AuditResource::Authentication,
            "Authentication",
            changes,
        )
    }
}

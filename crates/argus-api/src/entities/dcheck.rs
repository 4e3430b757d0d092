//! Discovery check listing.

use indexmap::IndexMap;

use crate::{
    error::ApiResult,
    options::{GetOptions, GetResult, Output},
    output::{finalize, unset_extra},
    permission::empty_result,
    query::{
        apply_filter, apply_output, apply_search, apply_sort, base_query, fetch_keyed,
        id_condition, EntityDef,
    },
    user::{ApiUser, Role},
    Api,
};

const DCHECK: EntityDef = EntityDef {
    table: "dchecks",
    alias: "dc",
    pk: "dcheckid",
    fields: &[
        "dcheckid",
        "druleid",
        "type",
        "key_",
        "snmp_community",
        "ports",
        "snmpv3_securityname",
        "snmpv3_securitylevel",
        "uniq",
        "host_source",
        "name_source",
    ],
    search_fields: &["key_", "snmp_community", "ports", "snmpv3_securityname"],
    sort_columns: &["dcheckid", "druleid"],
};

const DRULE: EntityDef = EntityDef {
    table: "drules",
    alias: "dr",
    pk: "druleid",
    fields: &["druleid", "name", "iprange", "delay", "status"],
    search_fields: &["name", "iprange"],
    sort_columns: &["druleid", "name"],
};

#[derive(Debug, Default)]
pub struct DCheckGet {
    pub dcheckids: Option<Vec<i64>>,
    pub druleids: Option<Vec<i64>>,
    /// Attach the owning discovery rule under `drules`.
    pub select_drules: Option<Output>,
    pub options: GetOptions,
}

pub struct DCheckApi<'a> {
    pub(crate) api: &'a Api,
}

impl DCheckApi<'_> {
    pub fn get(&self, user: &ApiUser, params: DCheckGet) -> ApiResult<GetResult> {
        params.options.validate(&DCHECK)?;
        if let Some(Output::Fields(fields)) = &params.select_drules {
            for field in fields {
                if !DRULE.fields.contains(&field.as_str()) {
                    return Err(crate::error::ApiError::parameter(
                        "/selectDRules",
                        format!("value \"{field}\" is not allowed."),
                    ));
                }
            }
        }

        if user.role < Role::Admin {
            return Ok(empty_result(&params.options));
        }

        let mut query = base_query(&self.api.db, &DCHECK);

        if let Some(ids) = &params.dcheckids {
            query = query.cond("dcheckids", id_condition(&DCHECK.pk_col(), ids));
        }

        if let Some(ids) = &params.druleids {
            query = query.cond("druleids", id_condition(&DCHECK.col("druleid"), ids));
        }

        if let Some(filter) = &params.options.filter {
            query = apply_filter(query, DCHECK.alias, DCHECK.fields, filter);
        }

        if let Some(search) = &params.options.search {
            query = apply_search(
                query,
                DCHECK.alias,
                DCHECK.search_fields,
                search,
                &params.options,
            );
        }

        if params.options.count_output {
            return Ok(GetResult::Count(query.count_distinct(&DCHECK.pk_col())?));
        }

        // The rule reference is needed for chaining even when not requested.
        let extra = if params.select_drules.is_some() {
            &["druleid"][..]
        } else {
            &[]
        };
        query = apply_output(query, &DCHECK, &params.options.output, extra);
        query = apply_sort(query, &DCHECK, &params.options);
        query = query.limit(params.options.limit.unwrap_or(self.api.config.search_limit));

        let mut rows = fetch_keyed(query, &DCHECK)?;

        if let Some(output) = &params.select_drules {
            self.add_drules(&mut rows, output)?;
        }

        let mut extra_fields = vec![DCHECK.pk];
        if params.select_drules.is_some() {
            extra_fields.push("druleid");
        }
        unset_extra(&mut rows, &params.options.output, &extra_fields);

        Ok(finalize(rows, params.options.preservekeys))
    }

    fn add_drules(
        &self,
        rows: &mut IndexMap<i64, argus_db::Row>,
        output: &Output,
    ) -> ApiResult<()> {
        let druleids: Vec<i64> = rows
            .values()
            .filter_map(|row| row.get("druleid").and_then(|v| v.as_i64()))
            .collect();

        let mut query = base_query(&self.api.db, &DRULE)
            .cond("druleids", id_condition(&DRULE.pk_col(), &druleids));
        query = apply_output(query, &DRULE, output, &[]);

        let mut rules = fetch_keyed(query, &DRULE)?;
        unset_extra(&mut rules, output, &[DRULE.pk]);

        for row in rows.values_mut() {
            let attached = row
                .get("druleid")
                .and_then(|v| v.as_i64())
                .and_then(|id| rules.get(&id))
                .map(|rule| vec![serde_json::Value::Object(rule.clone())])
                .unwrap_or_default();
            row.insert("drules".to_string(), serde_json::Value::Array(attached));
        }

        Ok(())
    }
}

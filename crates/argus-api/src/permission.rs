//! Permission predicates.
//!
//! Coarse checks gate on the caller's role. Fine-grained checks inject a
//! correlated subquery over the host-group rights table: access requires at
//! least one linking group, no group may deny, and the best grant must reach
//! the requested level. A single DENY for the owning host always wins.

use argus_db::{expr::RawSql, Database, SelectQuery};
use indexmap::IndexMap;
use rusqlite::types::Value;

use crate::{
    error::{ApiError, ApiResult},
    options::{GetOptions, GetResult},
    query::id_condition,
    user::{ApiUser, Role},
};

pub const PERM_DENY: i64 = 0;
pub const PERM_READ: i64 = 2;
pub const PERM_READ_WRITE: i64 = 3;

/// Errors unless the caller's role reaches `min`.
pub fn require_role(user: &ApiUser, min: Role) -> ApiResult<()> {
    if user.role < min {
        return Err(ApiError::access_denied());
    }
    Ok(())
}

/// The empty result a `get` short-circuits to when the caller's role is
/// below the entity's minimum.
pub fn empty_result(options: &GetOptions) -> GetResult {
    if options.count_output {
        GetResult::Count(0)
    } else if options.preservekeys {
        GetResult::Keyed(IndexMap::new())
    } else {
        GetResult::Rows(Vec::new())
    }
}

/// Builds the row-level host permission predicate for `hostid_col`.
///
/// `level` is the requested permission (`PERM_READ` for reads,
/// `PERM_READ_WRITE` when the call intends to mutate). Callers skip this for
/// super admins.
pub fn host_rights_cond(hostid_col: &str, user: &ApiUser, level: i64) -> RawSql {
    if user.usrgrpids.is_empty() {
        return RawSql::new("1=0", vec![]);
    }

    let placeholders = vec!["?"; user.usrgrpids.len()].join(",");
    let sql = format!(
        "EXISTS (SELECT NULL FROM hosts_groups hgg \
         JOIN rights r ON r.id=hgg.groupid AND r.groupid IN ({placeholders}) \
         WHERE {hostid_col}=hgg.hostid \
         GROUP BY hgg.hostid \
         HAVING MIN(r.permission)>{PERM_DENY} AND MAX(r.permission)>=?)"
    );

    let mut params: Vec<Value> = user
        .usrgrpids
        .iter()
        .map(|id| Value::Integer(*id))
        .collect();
    params.push(Value::Integer(level));

    RawSql::new(sql, params)
}

/// Confirms the caller may modify every referenced host, all-or-nothing.
///
/// Missing hosts and visible-but-not-writable hosts produce the same error,
/// so callers cannot probe for existence.
pub fn assert_writable_hosts(db: &Database, user: &ApiUser, hostids: &[i64]) -> ApiResult<()> {
    if hostids.is_empty() || user.is_super_admin() {
        return Ok(());
    }

    let mut uniq = hostids.to_vec();
    uniq.sort_unstable();
    uniq.dedup();

    let visible = SelectQuery::from(db.clone(), "hosts", "h")
        .filter(id_condition("h.hostid", &uniq))
        .filter(host_rights_cond("h.hostid", user, PERM_READ_WRITE))
        .count_distinct("h.hostid")?;

    if visible as usize != uniq.len() {
        return Err(ApiError::no_permission());
    }
    Ok(())
}

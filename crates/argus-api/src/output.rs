//! Output shaping: the last step before rows are returned to the caller.

use argus_db::Row;
use indexmap::IndexMap;

use crate::options::{GetResult, Output};

/// Removes every field the caller did not request.
///
/// `extra` names the fields earlier steps selected for internal chaining
/// (primary keys, join keys for relation mapping); with an explicit output
/// list they are dropped here unless the caller asked for them.
pub fn unset_extra(rows: &mut IndexMap<i64, Row>, output: &Output, extra: &[&str]) {
    let requested = match output {
        Output::Extend => return,
        Output::Fields(fields) => fields,
    };
    for row in rows.values_mut() {
        for field in extra {
            if !requested.iter().any(|f| f == field) {
                row.shift_remove(*field);
            }
        }
    }
}

/// Converts the keyed result set into its final representation.
pub fn finalize(rows: IndexMap<i64, Row>, preservekeys: bool) -> GetResult {
    if preservekeys {
        GetResult::Keyed(rows)
    } else {
        GetResult::Rows(rows.into_values().collect())
    }
}

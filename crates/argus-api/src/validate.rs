//! Declarative input validation.
//!
//! Mutation payloads are JSON values checked against a [`Rule`] tree built by
//! each service. The interpreter walks the payload, fills in defaults, and
//! fails fast on the first violation with a `/index/field` path.

use serde_json::Value;

use crate::error::{ApiError, ApiResult};

/// A validation rule. Rule trees are plain data; [`check`] interprets them.
pub enum Rule {
    /// An object with a fixed field set; unexpected keys are rejected.
    Object(Vec<Field>),
    /// A non-empty array of objects, optionally unique over a key tuple
    /// within the payload itself.
    Objects {
        fields: Vec<Field>,
        uniq_by: Vec<&'static str>,
    },
    Str {
        max_len: usize,
        not_empty: bool,
    },
    Int {
        min: i64,
        max: i64,
    },
    /// An integer restricted to an enumerated set.
    In(Vec<i64>),
    /// A non-negative object identifier.
    Id,
    /// A time-unit string (`<n>[smhdw]`) whose value in seconds lies in range.
    TimeUnit {
        min: i64,
        max: i64,
    },
    /// Any JSON value, persisted verbatim.
    Any,
}

pub struct Field {
    pub name: &'static str,
    pub rule: Rule,
    pub required: bool,
    pub default: Option<Value>,
}

impl Field {
    pub fn required(name: &'static str, rule: Rule) -> Self {
        Self {
            name,
            rule,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, rule: Rule) -> Self {
        Self {
            name,
            rule,
            required: false,
            default: None,
        }
    }

    pub fn with_default(name: &'static str, rule: Rule, default: Value) -> Self {
        Self {
            name,
            rule,
            required: false,
            default: Some(default),
        }
    }
}

/// Validates `value` against `rule`, normalizing defaults in place.
pub fn check(rule: &Rule, value: &mut Value, path: &str) -> ApiResult<()> {
    match rule {
        Rule::Object(fields) => check_object(fields, value, path),
        Rule::Objects { fields, uniq_by } => {
            let items = value
                .as_array_mut()
                .ok_or_else(|| ApiError::parameter(path, "an array is expected."))?;
            if items.is_empty() {
                return Err(ApiError::parameter(path, "cannot be empty."));
            }
            for (idx, item) in items.iter_mut().enumerate() {
                check_object(fields, item, &child_path(path, &(idx + 1).to_string()))?;
            }
            if !uniq_by.is_empty() {
                check_uniq(items, uniq_by, path)?;
            }
            Ok(())
        }
        Rule::Str { max_len, not_empty } => {
            let s = value
                .as_str()
                .ok_or_else(|| ApiError::parameter(path, "a character string is expected."))?;
            if *not_empty && s.is_empty() {
                return Err(ApiError::parameter(path, "cannot be empty."));
            }
            if s.chars().count() > *max_len {
                return Err(ApiError::parameter(path, "value is too long."));
            }
            Ok(())
        }
        Rule::Int { min, max } => {
            let n = int_value(value, path)?;
            if n < *min || n > *max {
                return Err(ApiError::parameter(
                    path,
                    format!("value must be one of {min}-{max}."),
                ));
            }
            Ok(())
        }
        Rule::In(allowed) => {
            let n = int_value(value, path)?;
            if !allowed.contains(&n) {
                let list = allowed
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ApiError::parameter(
                    path,
                    format!("value must be one of {list}."),
                ));
            }
            Ok(())
        }
        Rule::Id => {
            let n = int_value(value, path)?;
            if n < 0 {
                return Err(ApiError::parameter(path, "a number is expected."));
            }
            Ok(())
        }
        Rule::TimeUnit { min, max } => {
            let s = value
                .as_str()
                .ok_or_else(|| ApiError::parameter(path, "a time unit is expected."))?;
            match parse_time_unit(s) {
                Some(secs) if secs >= *min && secs <= *max => Ok(()),
                Some(_) => Err(ApiError::parameter(
                    path,
                    format!("value must be one of {min}-{max}."),
                )),
                None => Err(ApiError::parameter(path, "a time unit is expected.")),
            }
        }
        Rule::Any => Ok(()),
    }
}

fn check_object(fields: &[Field], value: &mut Value, path: &str) -> ApiResult<()> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| ApiError::parameter(path, "an object is expected."))?;

    if let Some(unexpected) = obj.keys().find(|k| fields.iter().all(|f| f.name != *k)) {
        return Err(ApiError::parameter(
            path,
            format!("unexpected parameter \"{unexpected}\"."),
        ));
    }

    for field in fields {
        let field_path = child_path(path, field.name);
        match obj.get_mut(field.name) {
            Some(v) => check(&field.rule, v, &field_path)?,
            None if field.required => {
                return Err(ApiError::parameter(
                    path,
                    format!("the parameter \"{}\" is missing.", field.name),
                ));
            }
            None => {
                if let Some(default) = &field.default {
                    obj.insert(field.name.to_string(), default.clone());
                }
            }
        }
    }

    Ok(())
}

fn check_uniq(items: &[Value], uniq_by: &[&'static str], path: &str) -> ApiResult<()> {
    let mut seen: Vec<Vec<String>> = Vec::with_capacity(items.len());

    for (idx, item) in items.iter().enumerate() {
        let key: Vec<String> = uniq_by
            .iter()
            .map(|f| item.get(*f).map(scalar_to_string).unwrap_or_default())
            .collect();
        if seen.contains(&key) {
            return Err(ApiError::parameter(
                child_path(path, &(idx + 1).to_string()),
                format!(
                    "value ({})=({}) already exists.",
                    uniq_by.join(", "),
                    key.join(", ")
                ),
            ));
        }
        seen.push(key);
    }

    Ok(())
}

fn child_path(path: &str, segment: &str) -> String {
    if path == "/" {
        format!("/{segment}")
    } else {
        format!("{path}/{segment}")
    }
}

fn int_value(value: &Value, path: &str) -> ApiResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| ApiError::parameter(path, "an integer is expected."))
}

/// Renders a JSON scalar the way it appears in error messages and audit rows.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses `<n>[smhdw]` into seconds. Bare digits are taken as seconds.
pub fn parse_time_unit(value: &str) -> Option<i64> {
    if value.is_empty() {
        return None;
    }
    let (num, mult) = match value.chars().last() {
        Some('s') => (&value[..value.len() - 1], 1),
        Some('m') => (&value[..value.len() - 1], 60),
        Some('h') => (&value[..value.len() - 1], 3600),
        Some('d') => (&value[..value.len() - 1], 86400),
        Some('w') => (&value[..value.len() - 1], 604800),
        Some(c) if c.is_ascii_digit() => (value, 1),
        _ => return None,
    };
    if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    num.parse::<i64>().ok().map(|n| n * mult)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn token_rule() -> Rule {
        Rule::Objects {
            fields: vec![
                Field::required("name", Rule::Str { max_len: 64, not_empty: true }),
                Field::with_default("description", Rule::Str { max_len: 255, not_empty: false }, json!("")),
                Field::optional("userid", Rule::Id),
                Field::with_default("status", Rule::In(vec![0, 1]), json!(0)),
            ],
            uniq_by: vec!["userid", "name"],
        }
    }

    #[test]
    fn test_defaults_are_filled_in() {
        let mut value = json!([{ "name": "ci", "userid": 1 }]);
        check(&token_rule(), &mut value, "/").unwrap();

        assert_eq!(value[0]["description"], "");
        assert_eq!(value[0]["status"], 0);
    }

    #[test]
    fn test_missing_required_field() {
        let mut value = json!([{ "userid": 1 }]);
        let err = check(&token_rule(), &mut value, "/").unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/1\": the parameter \"name\" is missing."
        );
    }

    #[test]
    fn test_unexpected_parameter() {
        let mut value = json!([{ "name": "ci", "color": "red" }]);
        let err = check(&token_rule(), &mut value, "/").unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/1\": unexpected parameter \"color\"."
        );
    }

    #[test]
    fn test_too_long_value() {
        let mut value = json!([{ "name": "x".repeat(65) }]);
        let err = check(&token_rule(), &mut value, "/").unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/1/name\": value is too long."
        );
    }

    #[test]
    fn test_duplicate_within_payload() {
        let mut value = json!([
            { "name": "ci", "userid": 1 },
            { "name": "ci", "userid": 1 }
        ]);
        let err = check(&token_rule(), &mut value, "/").unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/2\": value (userid, name)=(1, ci) already exists."
        );
    }

    #[test]
    fn test_enumerated_range() {
        let mut value = json!([{ "name": "ci", "status": 5 }]);
        let err = check(&token_rule(), &mut value, "/").unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/1/status\": value must be one of 0, 1."
        );
    }

    #[test]
    fn test_time_unit() {
        assert_eq!(parse_time_unit("365d"), Some(365 * 86400));
        assert_eq!(parse_time_unit("2w"), Some(2 * 604800));
        assert_eq!(parse_time_unit("90"), Some(90));
        assert_eq!(parse_time_unit("1y"), None);
        assert_eq!(parse_time_unit(""), None);
        assert_eq!(parse_time_unit("d"), None);

        let mut value = json!("12h");
        check(&Rule::TimeUnit { min: 3600, max: 86400 }, &mut value, "/hk_audit").unwrap();

        let mut value = json!("10s");
        let err = check(&Rule::TimeUnit { min: 3600, max: 86400 }, &mut value, "/hk_audit")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameter \"/hk_audit\": value must be one of 3600-86400."
        );
    }
}

//! Helpers for reading loosely typed probe options.
//!
//! Option keys are already lower-cased by the dispatcher. Integer options
//! accept JSON numbers or digit strings and are taken as absolute values.

use scouter_common::{RawOptions, ScouterError, ScouterResult};
use serde_json::Value;

pub(crate) fn missing(name: &str) -> ScouterError {
    ScouterError::validation(format!(
        "Required test option of '{name}' was not given. Please pass the required '{name}' option."
    ))
}

/// Render a scalar option the way a user would have typed it.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn required_str(options: &RawOptions, name: &str) -> ScouterResult<String> {
    match options.get(name) {
        None | Some(Value::Null) => Err(missing(name)),
        Some(value) => scalar_text(value).ok_or_else(|| {
            ScouterError::validation(format!("Provided '{name}' must be a string."))
        }),
    }
}

pub(crate) fn optional_str(options: &RawOptions, name: &str) -> Option<String> {
    options.get(name).and_then(scalar_text)
}

/// Non-negative integer option, `default` when absent.
pub(crate) fn int_option(options: &RawOptions, name: &str, default: u64) -> ScouterResult<u64> {
    let value = match options.get(name) {
        None | Some(Value::Null) => return Ok(default),
        Some(value) => value,
    };
    let not_integer = || {
        let shown = scalar_text(value).unwrap_or_else(|| value.to_string());
        ScouterError::validation(format!("Provided '{name}' of '{shown}' must be an integer."))
    };
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(i64::unsigned_abs))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.abs().trunc() as u64))
            .ok_or_else(not_integer),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse::<u64>().map_err(|_| not_integer())
        }
        _ => Err(not_integer()),
    }
}

/// Integer option that must fall within `[min, max]`.
pub(crate) fn bounded_int(
    options: &RawOptions,
    name: &str,
    default: u64,
    min: u64,
    max: u64,
) -> ScouterResult<u64> {
    let value = int_option(options, name, default)?;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ScouterError::validation(format!(
            "Provided '{name}' of '{value}' is not allowed. Min: {min}, Max: {max}."
        )))
    }
}

pub(crate) fn bool_option(options: &RawOptions, name: &str) -> bool {
    match options.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

/// A whitespace separated string or a list of strings.
pub(crate) fn string_list(options: &RawOptions, name: &str) -> ScouterResult<Option<Vec<String>>> {
    match options.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.split_whitespace().map(str::to_string).collect())),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                scalar_text(item).ok_or_else(|| {
                    ScouterError::validation(format!("Provided '{name}' must contain only strings."))
                })
            })
            .collect::<ScouterResult<Vec<_>>>()
            .map(Some),
        Some(_) => Err(ScouterError::validation(format!(
            "Provided '{name}' must be a string or a list of strings."
        ))),
    }
}

/// Request headers as a mapping or a list of `"name: value"` strings.
pub(crate) fn headers_option(options: &RawOptions) -> ScouterResult<Vec<(String, String)>> {
    let invalid = || {
        ScouterError::validation(
            "Provided 'headers' must be a mapping or a list of 'name: value' strings.",
        )
    };
    match options.get("headers") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, value)| Ok((name.clone(), scalar_text(value).ok_or_else(invalid)?)))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                let line = item.as_str().ok_or_else(invalid)?;
                let (name, value) = line.split_once(':').ok_or_else(invalid)?;
                Ok((name.trim().to_string(), value.trim().to_string()))
            })
            .collect(),
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(value: Value) -> RawOptions {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_required_option_message() {
        let err = required_str(&opts(json!({})), "dst").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Required test option of 'dst' was not given. Please pass the required 'dst' option."
        );
    }

    #[test]
    fn integers_from_numbers_and_digit_strings() {
        let o = opts(json!({"a": 5, "b": "12", "c": -7, "d": 3.9, "e": "x1", "f": true}));
        assert_eq!(int_option(&o, "a", 0).unwrap(), 5);
        assert_eq!(int_option(&o, "b", 0).unwrap(), 12);
        assert_eq!(int_option(&o, "c", 0).unwrap(), 7);
        assert_eq!(int_option(&o, "d", 0).unwrap(), 3);
        assert_eq!(int_option(&o, "missing", 42).unwrap(), 42);
        assert_eq!(
            int_option(&o, "e", 0).unwrap_err().to_string(),
            "Provided 'e' of 'x1' must be an integer."
        );
        assert!(int_option(&o, "f", 0).is_err());
    }

    #[test]
    fn bounded_int_reports_range() {
        let o = opts(json!({"max_ttl": 40}));
        assert_eq!(
            bounded_int(&o, "max_ttl", 32, 0, 32).unwrap_err().to_string(),
            "Provided 'max_ttl' of '40' is not allowed. Min: 0, Max: 32."
        );
    }

    #[test]
    fn string_list_accepts_both_shapes() {
        let o = opts(json!({"a": "1.1.1.1  8.8.8.8", "b": ["9.9.9.9"], "c": 5, "d": {}}));
        assert_eq!(string_list(&o, "a").unwrap().unwrap(), vec!["1.1.1.1", "8.8.8.8"]);
        assert_eq!(string_list(&o, "b").unwrap().unwrap(), vec!["9.9.9.9"]);
        assert_eq!(string_list(&o, "missing").unwrap(), None);
        assert!(string_list(&o, "d").is_err());
    }

    #[test]
    fn headers_from_mapping_or_lines() {
        let mapped = headers_option(&opts(json!({"headers": {"X-Test": "1"}}))).unwrap();
        assert_eq!(mapped, vec![("X-Test".to_string(), "1".to_string())]);
        let lines = headers_option(&opts(json!({"headers": ["Accept: text/html", "X-A:b"]}))).unwrap();
        assert_eq!(lines[0], ("Accept".to_string(), "text/html".to_string()));
        assert_eq!(lines[1], ("X-A".to_string(), "b".to_string()));
        assert!(headers_option(&opts(json!({"headers": ["no colon"]}))).is_err());
        assert!(headers_option(&opts(json!({}))).unwrap().is_empty());
    }

    #[test]
    fn booleans() {
        let o = opts(json!({"a": true, "b": "true", "c": 0, "d": "no"}));
        assert!(bool_option(&o, "a"));
        assert!(bool_option(&o, "b"));
        assert!(!bool_option(&o, "c"));
        assert!(!bool_option(&o, "d"));
        assert!(!bool_option(&o, "missing"));
    }
}

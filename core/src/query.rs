//! Query-string encoding of list filters.
//!
//! Parameters are serialized through `serde_json` and flattened: scalars
//! become text, `null` is dropped, arrays are comma-joined and nested objects
//! use bracket keys (`created_at[gt]=...`).

use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

/// Encode `params` as ordered query pairs.
///
/// # Errors
///
/// `Encode` if `params` does not serialize to a JSON object (or unit).
pub fn encode<P: Serialize + ?Sized>(params: &P) -> Result<Vec<(String, String)>, Error> {
    let value = serde_json::to_value(params).map_err(|err| Error::Encode(err.to_string()))?;
    let mut pairs = Vec::new();
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                flatten(key, value, &mut pairs)?;
            }
        }
        other => {
            return Err(Error::Encode(format!(
                "query parameters must be an object, got {other}"
            )))
        }
    }
    Ok(pairs)
}

/// Replace any existing `name` pair with `value`.
pub fn set(pairs: &mut Vec<(String, String)>, name: &str, value: Option<&str>) {
    pairs.retain(|(key, _)| key != name);
    if let Some(value) = value {
        pairs.push((name.to_string(), value.to_string()));
    }
}

/// Value of the first `name` pair.
pub fn get<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn flatten(key: String, value: Value, pairs: &mut Vec<(String, String)>) -> Result<(), Error> {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (child, value) in map {
                flatten(format!("{key}[{child}]"), value, pairs)?;
            }
        }
        Value::Array(items) => {
            let parts = items
                .into_iter()
                .filter(|item| !item.is_null())
                .map(|item| {
                    scalar(item).ok_or_else(|| Error::Encode(format!("`{key}` must be a list of scalars")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if !parts.is_empty() {
                pairs.push((key, parts.join(",")));
            }
        }
        scalar_value => {
            if let Some(text) = scalar(scalar_value) {
                pairs.push((key, text));
            }
        }
    }
    Ok(())
}

fn scalar(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

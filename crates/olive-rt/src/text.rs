//! String interpolation and regular expression binding.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, SecondsFormat};
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::error::RuntimeError;
use crate::value::Value;

/// Render an interpolated piece. Dates print as RFC 3339 in UTC.
pub fn to_text(value: &Value) -> Result<Value, RuntimeError> {
    let text = match value {
        Value::Str(s) | Value::Path(s) => return Ok(Value::Str(s.clone())),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Date(seconds) => DateTime::from_timestamp(*seconds, 0)
            .ok_or_else(|| RuntimeError::native("to-text", format!("date {seconds} is out of range")))?
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        Value::Json(json) => json.to_string(),
        other => {
            return Err(RuntimeError::WrongValue {
                expected: "printable",
                found: other.kind(),
            })
        }
    };
    Ok(Value::str(&text))
}

fn compiled(pattern: &str) -> Result<Arc<Regex>, RuntimeError> {
    static CACHE: OnceLock<Mutex<FxHashMap<String, Arc<Regex>>>> = OnceLock::new();
    let mut cache = CACHE.get_or_init(Default::default).lock();
    if let Some(regex) = cache.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| RuntimeError::native("regex", e.to_string()))?;
    let regex = Arc::new(regex);
    cache.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

/// Match the whole of `input`. On a match, a tuple with one optional
/// string per capture group; otherwise an empty optional.
pub fn regex_bind(pattern: &str, input: &str) -> Result<Value, RuntimeError> {
    let regex = compiled(pattern)?;
    let Some(captures) = regex.captures(input) else {
        return Ok(Value::none());
    };
    let groups = captures
        .iter()
        .skip(1)
        .map(|group| match group {
            Some(m) => Value::some(Value::str(m.as_str())),
            None => Value::none(),
        })
        .collect();
    Ok(Value::some(Value::tuple(groups)))
}

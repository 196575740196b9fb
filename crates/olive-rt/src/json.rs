//! Conversion between [`Value`]s and JSON, directed by [`Type`].
//!
//! Input records arrive as JSON objects and signatures are computed over
//! the JSON form of the signable fields, so both directions must agree:
//! `from_json(to_json(v, t), t) == v` for every well-formed `v`.
//!
//! | Type        | JSON                                          |
//! |-------------|-----------------------------------------------|
//! | `date`      | integer seconds since the epoch               |
//! | tuple       | array                                         |
//! | object      | object                                        |
//! | list        | array (sorted on the way in)                  |
//! | map         | object when keys are strings, else `[[k, v]]` |
//! | optional    | `null` or the value                           |
//! | algebraic   | `{"type": TAG, "contents": payload}`          |

use std::collections::BTreeMap;

use olive_typeck::ty::VariantShape;
use olive_typeck::Type;
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::compare::compare_float;
use crate::error::RuntimeError;
use crate::order;
use crate::value::Value;

fn fail(ty: &Type, message: impl Into<String>) -> RuntimeError {
    RuntimeError::Json {
        ty: ty.to_string(),
        message: message.into(),
    }
}

pub fn to_json(value: &Value, ty: &Type) -> Result<Json, RuntimeError> {
    Ok(match (ty, value) {
        (Type::Boolean, Value::Bool(b)) => Json::Bool(*b),
        (Type::Integer, Value::Int(i)) | (Type::Date, Value::Date(i)) => json!(i),
        (Type::Float, Value::Float(f)) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        (Type::String, Value::Str(s)) | (Type::Path, Value::Path(s)) => Json::String(s.to_string()),
        (Type::Json, Value::Json(j)) => (**j).clone(),
        (Type::List(inner), Value::List(items)) => Json::Array(
            items
                .iter()
                .map(|v| to_json(v, inner))
                .collect::<Result<_, _>>()?,
        ),
        (Type::Map(k, v), Value::Map(entries)) => {
            if **k == Type::String {
                let mut out = JsonMap::new();
                for (key, value) in entries.iter() {
                    out.insert(key.as_str()?.to_string(), to_json(value, v)?);
                }
                Json::Object(out)
            } else {
                Json::Array(
                    entries
                        .iter()
                        .map(|(key, value)| Ok(json!([to_json(key, k)?, to_json(value, v)?])))
                        .collect::<Result<_, RuntimeError>>()?,
                )
            }
        }
        (Type::Tuple(types), Value::Tuple(items)) => Json::Array(
            types
                .iter()
                .zip(items.iter())
                .map(|(t, v)| to_json(v, t))
                .collect::<Result<_, _>>()?,
        ),
        (Type::Object(fields), Value::Tuple(items)) => object_to_json(fields, items)?,
        (Type::Optional(_), Value::Optional(None)) => Json::Null,
        (Type::Optional(inner), Value::Optional(Some(v))) => to_json(v, inner)?,
        (Type::Algebraic(variants), Value::Algebraic(tag, payload)) => {
            let shape = variants
                .get(&**tag)
                .ok_or_else(|| fail(ty, format!("no variant {tag}")))?;
            let contents = match shape {
                VariantShape::Empty => Json::Array(Vec::new()),
                VariantShape::Tuple(types) => Json::Array(
                    types
                        .iter()
                        .zip(payload.iter())
                        .map(|(t, v)| to_json(v, t))
                        .collect::<Result<_, _>>()?,
                ),
                VariantShape::Object(fields) => object_to_json(fields, payload)?,
            };
            json!({ "type": &**tag, "contents": contents })
        }
        (_, other) => return Err(fail(ty, format!("found {} value", other.kind()))),
    })
}

fn object_to_json(fields: &BTreeMap<String, Type>, items: &[Value]) -> Result<Json, RuntimeError> {
    let mut out = JsonMap::new();
    for ((name, t), v) in fields.iter().zip(items) {
        out.insert(name.clone(), to_json(v, t)?);
    }
    Ok(Json::Object(out))
}

pub fn from_json(json: &Json, ty: &Type) -> Result<Value, RuntimeError> {
    Ok(match ty {
        Type::Boolean => Value::Bool(json.as_bool().ok_or_else(|| fail(ty, "expected a boolean"))?),
        Type::Integer => Value::Int(json.as_i64().ok_or_else(|| fail(ty, "expected an integer"))?),
        Type::Date => Value::Date(json.as_i64().ok_or_else(|| fail(ty, "expected epoch seconds"))?),
        Type::Float => Value::Float(json.as_f64().ok_or_else(|| fail(ty, "expected a number"))?),
        Type::String => Value::str(json.as_str().ok_or_else(|| fail(ty, "expected a string"))?),
        Type::Path => Value::path(json.as_str().ok_or_else(|| fail(ty, "expected a string"))?),
        Type::Json => Value::json(json.clone()),
        Type::List(inner) => {
            let items = json
                .as_array()
                .ok_or_else(|| fail(ty, "expected an array"))?
                .iter()
                .map(|j| from_json(j, inner))
                .collect::<Result<Vec<_>, _>>()?;
            order::sorted_set(items, inner)?
        }
        Type::Map(k, v) => {
            let entries = match json {
                Json::Object(fields) if **k == Type::String => fields
                    .iter()
                    .map(|(key, value)| Ok((Value::str(key), from_json(value, v)?)))
                    .collect::<Result<Vec<_>, RuntimeError>>()?,
                Json::Array(rows) => rows
                    .iter()
                    .map(|row| match row.as_array().map(Vec::as_slice) {
                        Some([key, value]) => Ok((from_json(key, k)?, from_json(value, v)?)),
                        _ => Err(fail(ty, "expected [key, value] pairs")),
                    })
                    .collect::<Result<Vec<_>, RuntimeError>>()?,
                _ => return Err(fail(ty, "expected an object or an array of pairs")),
            };
            order::sorted_dict(entries, k)?
        }
        Type::Tuple(types) => {
            let items = json.as_array().ok_or_else(|| fail(ty, "expected an array"))?;
            if items.len() != types.len() {
                return Err(fail(ty, format!("expected {} elements", types.len())));
            }
            Value::tuple(
                items
                    .iter()
                    .zip(types)
                    .map(|(j, t)| from_json(j, t))
                    .collect::<Result<_, _>>()?,
            )
        }
        Type::Object(fields) => Value::tuple(object_from_json(json, fields, ty)?),
        Type::Optional(inner) => match json {
            Json::Null => Value::none(),
            other => Value::some(from_json(other, inner)?),
        },
        Type::Algebraic(variants) => {
            let tag = json
                .get("type")
                .and_then(Json::as_str)
                .ok_or_else(|| fail(ty, "expected a \"type\" tag"))?;
            let shape = variants
                .get(tag)
                .ok_or_else(|| fail(ty, format!("no variant {tag}")))?;
            let contents = json.get("contents").unwrap_or(&Json::Null);
            let payload = match shape {
                VariantShape::Empty => Vec::new(),
                VariantShape::Tuple(types) => {
                    let Value::Tuple(items) = from_json(contents, &Type::Tuple(types.clone()))? else {
                        return Err(fail(ty, "expected an array payload"));
                    };
                    items.to_vec()
                }
                VariantShape::Object(fields) => object_from_json(contents, fields, ty)?,
            };
            Value::algebraic(tag, payload)
        }
        Type::Bad | Type::Nothing => return Err(fail(ty, "no values have this type")),
    })
}

fn object_from_json(
    json: &Json,
    fields: &BTreeMap<String, Type>,
    ty: &Type,
) -> Result<Vec<Value>, RuntimeError> {
    let object = json.as_object().ok_or_else(|| fail(ty, "expected an object"))?;
    fields
        .iter()
        .map(|(name, t)| {
            let field = object.get(name).unwrap_or(&Json::Null);
            if field.is_null() && !matches!(t, Type::Optional(_)) {
                return Err(fail(ty, format!("missing field {name}")));
            }
            from_json(field, t)
        })
        .collect()
}

/// Float rendering that keeps `1.0` distinct from `1`.
pub fn float_text(value: f64) -> String {
    if compare_float(value, value.trunc()) == 0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(descriptor: &str) -> Type {
        Type::parse_descriptor(descriptor).unwrap()
    }

    #[test]
    fn objects_are_read_in_field_order() {
        let t = ty("o2bytes$ipath$p");
        let v = from_json(&json!({"path": "/a", "bytes": 3}), &t).unwrap();
        assert_eq!(v, Value::tuple(vec![Value::Int(3), Value::path("/a")]));
        assert_eq!(to_json(&v, &t).unwrap(), json!({"bytes": 3, "path": "/a"}));
    }

    #[test]
    fn lists_are_sorted_on_the_way_in() {
        let v = from_json(&json!(["b", "a", "b"]), &ty("as")).unwrap();
        assert_eq!(v, Value::List(vec![Value::str("a"), Value::str("b")].into()));
    }

    #[test]
    fn algebraic_values_carry_their_tag() {
        let t = ty("u2NONE$t0SOME$t1i");
        let v = from_json(&json!({"type": "SOME", "contents": [4]}), &t).unwrap();
        assert_eq!(v, Value::algebraic("SOME", vec![Value::Int(4)]));
        assert_eq!(to_json(&v, &t).unwrap(), json!({"type": "SOME", "contents": [4]}));
        assert!(from_json(&json!({"type": "MAYBE"}), &t).is_err());
    }

    #[test]
    fn optionals_and_missing_fields() {
        let t = ty("o2a$qib$s");
        let v = from_json(&json!({"b": "x"}), &t).unwrap();
        assert_eq!(v, Value::tuple(vec![Value::none(), Value::str("x")]));
        assert!(from_json(&json!({"a": 1}), &t).is_err());
    }

    #[test]
    fn float_text_keeps_a_fraction() {
        assert_eq!(float_text(2.0), "2.0");
        assert_eq!(float_text(0.25), "0.25");
    }
}

//! Signatures over the signable fields of a record.

use olive_typeck::definitions::SignatureKind;
use olive_typeck::Type;
use serde_json::{Map as JsonMap, Value as Json};
use sha2::{Digest, Sha256};

use crate::error::RuntimeError;
use crate::json::to_json;
use crate::value::Value;

/// Condense `values` (one per field in `fields`, sorted by name) into the
/// signature of the given kind.
pub fn compute(
    kind: SignatureKind,
    fields: &[(String, Type)],
    values: &[Value],
) -> Result<Value, RuntimeError> {
    if fields.len() != values.len() {
        return Err(RuntimeError::malformed(format!(
            "signature over {} fields given {} values",
            fields.len(),
            values.len()
        )));
    }
    Ok(match kind {
        SignatureKind::Names => Value::List(fields.iter().map(|(name, _)| Value::str(name)).collect()),
        SignatureKind::Json => Value::json(as_json(fields, values)?),
        SignatureKind::Sha256 => {
            let text = as_json(fields, values)?.to_string();
            let digest = Sha256::digest(text.as_bytes());
            Value::str(&hex(&digest))
        }
    })
}

fn as_json(fields: &[(String, Type)], values: &[Value]) -> Result<Json, RuntimeError> {
    let mut out = JsonMap::new();
    for ((name, ty), value) in fields.iter().zip(values) {
        out.insert(name.clone(), to_json(value, ty)?);
    }
    Ok(Json::Object(out))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

//! The standard native function library.
//!
//! Each builtin has a registry definition (so programs type-check against
//! it) and a body (so programs can run it). Builtins need no services.

use std::path::Path;

use olive_typeck::definitions::FunctionDefinition;
use olive_typeck::Type;

use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::json::float_text;
use crate::value::Value;

type Body = fn(&[Value]) -> Result<Value, RuntimeError>;

struct Builtin {
    name: &'static str,
    parameters: Vec<Type>,
    return_type: Type,
    body: Body,
}

fn table() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "string_length",
            parameters: vec![Type::String],
            return_type: Type::Integer,
            body: |args| Ok(Value::Int(args[0].as_str()?.chars().count() as i64)),
        },
        Builtin {
            name: "string_lower",
            parameters: vec![Type::String],
            return_type: Type::String,
            body: |args| Ok(Value::str(&args[0].as_str()?.to_lowercase())),
        },
        Builtin {
            name: "string_upper",
            parameters: vec![Type::String],
            return_type: Type::String,
            body: |args| Ok(Value::str(&args[0].as_str()?.to_uppercase())),
        },
        Builtin {
            name: "string_trim",
            parameters: vec![Type::String],
            return_type: Type::String,
            body: |args| Ok(Value::str(args[0].as_str()?.trim())),
        },
        Builtin {
            name: "int_to_string",
            parameters: vec![Type::Integer],
            return_type: Type::String,
            body: |args| Ok(Value::str(&args[0].as_int()?.to_string())),
        },
        Builtin {
            name: "float_to_string",
            parameters: vec![Type::Float],
            return_type: Type::String,
            body: |args| Ok(Value::str(&float_text(args[0].as_float()?))),
        },
        Builtin {
            name: "int_to_float",
            parameters: vec![Type::Integer],
            return_type: Type::Float,
            body: |args| Ok(Value::Float(args[0].as_int()? as f64)),
        },
        Builtin {
            name: "float_round",
            parameters: vec![Type::Float],
            return_type: Type::Integer,
            body: |args| {
                let x = args[0].as_float()?.round();
                if x.is_finite() && x >= i64::MIN as f64 && x <= i64::MAX as f64 {
                    Ok(Value::Int(x as i64))
                } else {
                    Err(RuntimeError::native("float_round", format!("{x} is out of range")))
                }
            },
        },
        Builtin {
            name: "path_file",
            parameters: vec![Type::Path],
            return_type: Type::String,
            body: |args| {
                let path = Path::new(args[0].as_str()?);
                Ok(Value::str(
                    &path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                ))
            },
        },
        Builtin {
            name: "path_dir",
            parameters: vec![Type::Path],
            return_type: Type::Path,
            body: |args| {
                let path = Path::new(args[0].as_str()?);
                Ok(Value::path(
                    &path
                        .parent()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                ))
            },
        },
        Builtin {
            name: "json_string",
            parameters: vec![Type::Json],
            return_type: Type::String,
            body: |args| Ok(Value::str(&args[0].as_json()?.to_string())),
        },
        Builtin {
            name: "date_from_epoch",
            parameters: vec![Type::Integer],
            return_type: Type::Date,
            body: |args| Ok(Value::Date(args[0].as_int()?)),
        },
    ]
}

/// Registry definitions for every builtin.
pub fn definitions() -> Vec<FunctionDefinition> {
    table()
        .into_iter()
        .map(|b| FunctionDefinition {
            name: b.name.to_string(),
            parameters: b.parameters,
            return_type: b.return_type,
            services: Vec::new(),
        })
        .collect()
}

/// Register every builtin body, checking arity on each call.
pub fn register_all(context: &RuntimeContext) {
    for builtin in table() {
        let Builtin {
            name,
            parameters,
            body,
            ..
        } = builtin;
        let arity = parameters.len();
        context.register(name, move |args| {
            if args.len() != arity {
                return Err(RuntimeError::Arity {
                    name: name.to_string(),
                    expected: arity,
                    found: args.len(),
                });
            }
            body(args)
        });
    }
}

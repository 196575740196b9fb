//! Primitive comparisons and the set/dictionary comparisons built on them.
//!
//! Every comparison returns -1, 0 or 1. Composite comparisons take the
//! element comparator as a closure value generated by a backend, so the
//! runtime never needs to know element types.

use std::cmp::Ordering;

use olive_typeck::tir::CompareOp;

use crate::error::RuntimeError;
use crate::hash;
use crate::value::Value;

pub fn normalise(ordering: Ordering) -> i64 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

pub fn to_ordering(result: i64) -> Ordering {
    result.cmp(&0)
}

/// Whether a comparison result satisfies `op`.
pub fn holds(op: CompareOp, result: i64) -> bool {
    match op {
        CompareOp::Equal => result == 0,
        CompareOp::NotEqual => result != 0,
        CompareOp::Less => result < 0,
        CompareOp::LessEqual => result <= 0,
        CompareOp::Greater => result > 0,
        CompareOp::GreaterEqual => result >= 0,
    }
}

pub fn compare_bool(a: bool, b: bool) -> i64 {
    normalise(a.cmp(&b))
}

pub fn compare_int(a: i64, b: i64) -> i64 {
    normalise(a.cmp(&b))
}

/// IEEE 754 total order: `-0.0 < 0.0` and NaN sorts last.
pub fn compare_float(a: f64, b: f64) -> i64 {
    normalise(a.total_cmp(&b))
}

/// Byte-wise, which for UTF-8 is code point order.
pub fn compare_str(a: &str, b: &str) -> i64 {
    normalise(a.as_bytes().cmp(b.as_bytes()))
}

pub fn compare_json(a: &serde_json::Value, b: &serde_json::Value) -> i64 {
    compare_str(&a.to_string(), &b.to_string())
}

/// Call a comparator closure value.
pub fn call_comparator(comparator: &Value, a: &Value, b: &Value) -> Result<i64, RuntimeError> {
    comparator.call(&[a.clone(), b.clone()])?.as_int()
}

/// Call a hasher closure value.
pub fn call_hasher(hasher: &Value, v: &Value) -> Result<i64, RuntimeError> {
    hasher.call(std::slice::from_ref(v))?.as_int()
}

/// Lexicographic over elements, then shorter first.
pub fn compare_lists(a: &[Value], b: &[Value], comparator: &Value) -> Result<i64, RuntimeError> {
    for (x, y) in a.iter().zip(b) {
        let c = call_comparator(comparator, x, y)?;
        if c != 0 {
            return Ok(c);
        }
    }
    Ok(compare_int(a.len() as i64, b.len() as i64))
}

/// Lexicographic over entries, keys before values, then shorter first.
pub fn compare_maps(
    a: &[(Value, Value)],
    b: &[(Value, Value)],
    key_comparator: &Value,
    value_comparator: &Value,
) -> Result<i64, RuntimeError> {
    for ((ak, av), (bk, bv)) in a.iter().zip(b) {
        let c = call_comparator(key_comparator, ak, bk)?;
        if c != 0 {
            return Ok(c);
        }
        let c = call_comparator(value_comparator, av, bv)?;
        if c != 0 {
            return Ok(c);
        }
    }
    Ok(compare_int(a.len() as i64, b.len() as i64))
}

pub fn hash_list(items: &[Value], hasher: &Value) -> Result<i64, RuntimeError> {
    let mut h = hash::seed();
    for item in items {
        h = hash::combine(h, call_hasher(hasher, item)?);
    }
    Ok(h)
}

pub fn hash_map(
    entries: &[(Value, Value)],
    key_hasher: &Value,
    value_hasher: &Value,
) -> Result<i64, RuntimeError> {
    let mut h = hash::seed();
    for (k, v) in entries {
        h = hash::combine(h, call_hasher(key_hasher, k)?);
        h = hash::combine(h, call_hasher(value_hasher, v)?);
    }
    Ok(h)
}

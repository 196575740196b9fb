//! Sets and dictionaries ordered by a backend-supplied comparator.

use std::cmp::Ordering;

use crate::compare::{call_comparator, to_ordering};
use crate::error::RuntimeError;
use crate::value::Value;

/// Stable sort by a fallible comparator; the first error wins.
fn sort_by_comparator<T>(
    items: &mut [T],
    comparator: &Value,
    key: impl Fn(&T) -> &Value,
) -> Result<(), RuntimeError> {
    let mut failure = None;
    items.sort_by(|a, b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        match call_comparator(comparator, key(a), key(b)) {
            Ok(c) => to_ordering(c),
            Err(e) => {
                failure = Some(e);
                Ordering::Equal
            }
        }
    });
    failure.map_or(Ok(()), Err)
}

/// Sort and de-duplicate; of equal items the first is kept.
pub fn make_set(mut items: Vec<Value>, comparator: &Value) -> Result<Value, RuntimeError> {
    sort_by_comparator(&mut items, comparator, |v| v)?;
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        let duplicate = match out.last() {
            Some(last) => call_comparator(comparator, last, &item)? == 0,
            None => false,
        };
        if !duplicate {
            out.push(item);
        }
    }
    Ok(Value::List(out.into()))
}

/// Sort entries by key; of equal keys the last entry is kept.
pub fn make_dict(
    mut entries: Vec<(Value, Value)>,
    key_comparator: &Value,
) -> Result<Value, RuntimeError> {
    sort_by_comparator(&mut entries, key_comparator, |(k, _)| k)?;
    let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
    for entry in entries {
        let duplicate = match out.last() {
            Some((last, _)) => call_comparator(key_comparator, last, &entry.0)? == 0,
            None => false,
        };
        if duplicate {
            if let Some(last) = out.last_mut() {
                *last = entry;
            }
        } else {
            out.push(entry);
        }
    }
    Ok(Value::Map(out.into()))
}

/// Binary search for `key`; the result is an optional.
pub fn dict_get(
    entries: &[(Value, Value)],
    key: &Value,
    key_comparator: &Value,
) -> Result<Value, RuntimeError> {
    let (mut low, mut high) = (0, entries.len());
    while low < high {
        let mid = (low + high) / 2;
        match to_ordering(call_comparator(key_comparator, &entries[mid].0, key)?) {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
            Ordering::Equal => return Ok(Value::some(entries[mid].1.clone())),
        }
    }
    Ok(Value::none())
}

/// Rows of a dictionary as `{key, value}` tuples, for iteration.
pub fn dict_rows(entries: &[(Value, Value)]) -> Vec<Value> {
    entries
        .iter()
        .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
        .collect()
}

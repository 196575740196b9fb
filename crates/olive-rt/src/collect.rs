//! Reductions behind `Group`, `LeftJoin` and `For`.
//!
//! An [`Accumulator`] folds the values of one collector. Orderings and
//! de-duplication use the comparator closure the backend generated for the
//! collected type; collectors over unordered types never receive one.

use olive_typeck::tir::CollectorKind;

use crate::collections::make_set;
use crate::compare::{call_comparator, compare_str};
use crate::error::RuntimeError;
use crate::value::Value;

/// Static description of a collector, fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectSpec {
    pub kind: CollectorKind,
    /// `Sum` over floats rather than integers.
    pub float: bool,
    /// Wrap the result in an optional instead of failing when empty.
    pub optional_result: bool,
}

impl CollectSpec {
    pub fn new(kind: CollectorKind) -> Self {
        Self {
            kind,
            float: false,
            optional_result: false,
        }
    }
}

#[derive(Debug)]
enum State {
    Count(i64),
    Values(Vec<Value>),
    SumInt(i64),
    SumFloat(f64),
    First(Option<Value>),
    Best(Option<Value>),
    Strings(Vec<String>),
    Any(bool),
    All(bool),
}

#[derive(Debug)]
pub struct Accumulator {
    kind: CollectorKind,
    state: State,
}

impl Accumulator {
    pub fn new(spec: CollectSpec) -> Self {
        let state = match spec.kind {
            CollectorKind::Count => State::Count(0),
            CollectorKind::List | CollectorKind::Flatten | CollectorKind::Univalued => {
                State::Values(Vec::new())
            }
            CollectorKind::Sum if spec.float => State::SumFloat(0.0),
            CollectorKind::Sum => State::SumInt(0),
            CollectorKind::First => State::First(None),
            CollectorKind::Max | CollectorKind::Min => State::Best(None),
            CollectorKind::LexicalConcat => State::Strings(Vec::new()),
            CollectorKind::Any => State::Any(false),
            CollectorKind::All => State::All(true),
        };
        Self {
            kind: spec.kind,
            state,
        }
    }

    /// Fold one value in. `Count` ignores the value.
    pub fn push(&mut self, value: Value, comparator: Option<&Value>) -> Result<(), RuntimeError> {
        match &mut self.state {
            State::Count(n) => *n += 1,
            State::Values(values) => match self.kind {
                CollectorKind::Flatten => values.extend(value.as_list()?.iter().cloned()),
                _ => values.push(value),
            },
            State::SumInt(total) => *total = total.wrapping_add(value.as_int()?),
            State::SumFloat(total) => *total += value.as_float()?,
            State::First(first) => {
                if first.is_none() {
                    *first = Some(value);
                }
            }
            State::Best(best) => {
                let replace = match best {
                    None => true,
                    Some(current) => {
                        let c = call_comparator(required(comparator)?, &value, current)?;
                        if self.kind == CollectorKind::Max {
                            c > 0
                        } else {
                            c < 0
                        }
                    }
                };
                if replace {
                    *best = Some(value);
                }
            }
            State::Strings(strings) => strings.push(value.as_str()?.to_string()),
            State::Any(any) => *any = *any || value.as_bool()?,
            State::All(all) => *all = *all && value.as_bool()?,
        }
        Ok(())
    }

    /// The collected value, or `None` when the collector found nothing to
    /// return.
    pub fn finish(
        self,
        comparator: Option<&Value>,
        delimiter: Option<&str>,
    ) -> Result<Option<Value>, RuntimeError> {
        Ok(match self.state {
            State::Count(n) => Some(Value::Int(n)),
            State::Values(values) => {
                let set = make_set(values, required(comparator)?)?;
                if self.kind == CollectorKind::Univalued {
                    match set.as_list()? {
                        [only] => Some(only.clone()),
                        _ => None,
                    }
                } else {
                    Some(set)
                }
            }
            State::SumInt(total) => Some(Value::Int(total)),
            State::SumFloat(total) => Some(Value::Float(total)),
            State::First(first) => first,
            State::Best(best) => best,
            State::Strings(mut strings) => {
                strings.sort_by(|a, b| compare_str(a, b).cmp(&0));
                Some(Value::str(&strings.join(delimiter.unwrap_or(""))))
            }
            State::Any(any) => Some(Value::Bool(any)),
            State::All(all) => Some(Value::Bool(all)),
        })
    }
}

fn required(comparator: Option<&Value>) -> Result<&Value, RuntimeError> {
    comparator.ok_or_else(|| RuntimeError::malformed("collector needs a comparator"))
}

/// Apply the empty-result rules: a default wins, then optional wrapping.
/// `None` means the enclosing record is not ok.
pub fn settle(
    spec: CollectSpec,
    result: Option<Value>,
    default: impl FnOnce() -> Result<Option<Value>, RuntimeError>,
) -> Result<Option<Value>, RuntimeError> {
    match result {
        Some(v) if spec.optional_result && spec.kind.may_be_empty() => Ok(Some(Value::some(v))),
        Some(v) => Ok(Some(v)),
        None => match default()? {
            Some(d) => Ok(Some(d)),
            None if spec.optional_result => Ok(Some(Value::none())),
            None => Ok(None),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare_int;

    fn ints() -> Value {
        Value::native(|args| Ok(Value::Int(compare_int(args[0].as_int()?, args[1].as_int()?))))
    }

    fn run(kind: CollectorKind, values: &[i64]) -> Option<Value> {
        let cmp = ints();
        let mut acc = Accumulator::new(CollectSpec::new(kind));
        for v in values {
            acc.push(Value::Int(*v), Some(&cmp)).unwrap();
        }
        acc.finish(Some(&cmp), None).unwrap()
    }

    #[test]
    fn counts_and_sums() {
        assert_eq!(run(CollectorKind::Count, &[5, 5, 5]), Some(Value::Int(3)));
        assert_eq!(run(CollectorKind::Sum, &[1, 2, 3]), Some(Value::Int(6)));
        assert_eq!(run(CollectorKind::Sum, &[]), Some(Value::Int(0)));
    }

    #[test]
    fn list_is_a_set() {
        assert_eq!(
            run(CollectorKind::List, &[3, 1, 3]),
            Some(Value::List(vec![Value::Int(1), Value::Int(3)].into()))
        );
    }

    #[test]
    fn extremes_keep_the_first_tie() {
        assert_eq!(run(CollectorKind::Max, &[2, 9, 4]), Some(Value::Int(9)));
        assert_eq!(run(CollectorKind::Min, &[2, 9, 4]), Some(Value::Int(2)));
        assert_eq!(run(CollectorKind::Max, &[]), None);
        assert_eq!(run(CollectorKind::First, &[7, 8]), Some(Value::Int(7)));
    }

    #[test]
    fn univalued_needs_exactly_one_value() {
        assert_eq!(run(CollectorKind::Univalued, &[4, 4]), Some(Value::Int(4)));
        assert_eq!(run(CollectorKind::Univalued, &[4, 5]), None);
        assert_eq!(run(CollectorKind::Univalued, &[]), None);
    }

    #[test]
    fn lexical_concat_sorts_and_keeps_duplicates() {
        let mut acc = Accumulator::new(CollectSpec::new(CollectorKind::LexicalConcat));
        for s in ["b", "a", "b"] {
            acc.push(Value::str(s), None).unwrap();
        }
        assert_eq!(acc.finish(None, Some(",")).unwrap(), Some(Value::str("a,b,b")));
    }

    #[test]
    fn settling_empty_results() {
        let spec = CollectSpec::new(CollectorKind::First);
        assert_eq!(settle(spec, None, || Ok(None)).unwrap(), None);
        assert_eq!(
            settle(spec, None, || Ok(Some(Value::Int(0)))).unwrap(),
            Some(Value::Int(0))
        );
        let optional = CollectSpec {
            optional_result: true,
            ..spec
        };
        assert_eq!(settle(optional, None, || Ok(None)).unwrap(), Some(Value::none()));
        assert_eq!(
            settle(optional, Some(Value::Int(1)), || Ok(None)).unwrap(),
            Some(Value::some(Value::Int(1)))
        );
    }
}

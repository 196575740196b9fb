//! Least-upper-bound of two types.
//!
//! Unification is total: incompatible shapes produce [`Type::Bad`] rather
//! than an error, and callers decide whether a bad result is worth a
//! diagnostic. `Nothing` is the identity element and `Bad` is absorbing.

use std::collections::BTreeMap;

use crate::ty::{Type, VariantShape};

/// The most specific type both `a` and `b` can be viewed as.
pub fn unify(a: &Type, b: &Type) -> Type {
    let result = match (a, b) {
        (Type::Bad, _) | (_, Type::Bad) => Type::Bad,
        (Type::Nothing, other) | (other, Type::Nothing) => other.clone(),
        (Type::List(a), Type::List(b)) => Type::list(unify(a, b)),
        (Type::Optional(a), Type::Optional(b)) => Type::optional(unify(a, b)),
        (Type::Map(ak, av), Type::Map(bk, bv)) => Type::map(unify(ak, bk), unify(av, bv)),
        (Type::Tuple(a), Type::Tuple(b)) if a.len() == b.len() => {
            Type::Tuple(a.iter().zip(b).map(|(a, b)| unify(a, b)).collect())
        }
        (Type::Object(a), Type::Object(b)) => match unify_fields(a, b) {
            Some(fields) => Type::Object(fields),
            None => Type::Bad,
        },
        (Type::Algebraic(a), Type::Algebraic(b)) => match unify_variants(a, b) {
            Some(variants) => Type::Algebraic(variants),
            None => Type::Bad,
        },
        (a, b) if a == b => a.clone(),
        _ => Type::Bad,
    };
    if result.contains_bad() {
        Type::Bad
    } else {
        result
    }
}

/// Fold [`unify`] over a sequence, starting from `Nothing`.
pub fn unify_all<'a>(types: impl IntoIterator<Item = &'a Type>) -> Type {
    types
        .into_iter()
        .fold(Type::Nothing, |acc, ty| unify(&acc, ty))
}

fn unify_fields(
    a: &BTreeMap<String, Type>,
    b: &BTreeMap<String, Type>,
) -> Option<BTreeMap<String, Type>> {
    if a.len() != b.len() {
        return None;
    }
    a.iter()
        .zip(b)
        .map(|((an, at), (bn, bt))| (an == bn).then(|| (an.clone(), unify(at, bt))))
        .collect()
}

fn unify_variants(
    a: &BTreeMap<String, VariantShape>,
    b: &BTreeMap<String, VariantShape>,
) -> Option<BTreeMap<String, VariantShape>> {
    let mut variants = a.clone();
    for (name, shape) in b {
        match variants.get(name) {
            Some(existing) => {
                let merged = unify_shape(existing, shape)?;
                variants.insert(name.clone(), merged);
            }
            None => {
                variants.insert(name.clone(), shape.clone());
            }
        }
    }
    Some(variants)
}

fn unify_shape(a: &VariantShape, b: &VariantShape) -> Option<VariantShape> {
    match (a, b) {
        (VariantShape::Empty, VariantShape::Empty) => Some(VariantShape::Empty),
        (VariantShape::Tuple(a), VariantShape::Tuple(b)) if a.len() == b.len() => Some(
            VariantShape::Tuple(a.iter().zip(b).map(|(a, b)| unify(a, b)).collect()),
        ),
        (VariantShape::Object(a), VariantShape::Object(b)) => {
            unify_fields(a, b).map(VariantShape::Object)
        }
        _ => None,
    }
}

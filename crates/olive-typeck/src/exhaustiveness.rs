//! Coverage checks for `Match` and `Switch`.
//!
//! Algebraic values carry exactly one variant, so coverage reduces to set
//! difference over variant names. `Switch` can only cover an algebraic type
//! when every variant is payload-free and appears as a case.

use std::collections::BTreeSet;

use crate::ty::{Type, VariantShape};

/// Variants of `ty` not in `handled`, in name order.
pub fn missing_variants(ty: &Type, handled: &BTreeSet<String>) -> Vec<String> {
    match ty {
        Type::Algebraic(variants) => variants
            .keys()
            .filter(|name| !handled.contains(*name))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

/// For a `Switch` without `Else`: the cases still missing, or `None` when
/// the scrutinee type cannot be covered by literal cases at all.
pub fn switch_missing(ty: &Type, cases: &BTreeSet<String>) -> Option<Vec<String>> {
    match ty {
        Type::Algebraic(variants)
            if variants.values().all(|shape| *shape == VariantShape::Empty) =>
        {
            Some(missing_variants(ty, cases))
        }
        _ => None,
    }
}

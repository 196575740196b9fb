//! Integer literal suffixes.
//!
//! `4Gi` and `2weeks` are lexical conveniences: the front end folds them into
//! a single integer literal and the type system never sees them.

/// Multiplier for a suffix, or `None` if the suffix is not recognised.
pub fn multiplier(suffix: &str) -> Option<i64> {
    Some(match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "mins" => 60,
        "hours" => 3_600,
        "days" => 86_400,
        "weeks" => 604_800,
        _ => return None,
    })
}

/// Apply a suffix to a literal value. Overflow and unknown suffixes yield `None`.
pub fn apply(value: i64, suffix: &str) -> Option<i64> {
    multiplier(suffix).and_then(|m| value.checked_mul(m))
}

//! FNV-1a 64-bit hashing for primitive values.
//!
//! Backends hash composite values by folding these together with
//! [`combine`]; both backends must fold in the same order so grouping sees
//! the same hash for the same key.

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

fn fnv1a_bytes(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn hash_int(value: i64) -> i64 {
    fnv1a_bytes(&value.to_le_bytes()) as i64
}

pub fn hash_float(value: f64) -> i64 {
    fnv1a_bytes(&value.to_bits().to_le_bytes()) as i64
}

pub fn hash_bool(value: bool) -> i64 {
    fnv1a_bytes(&[value as u8]) as i64
}

pub fn hash_str(value: &str) -> i64 {
    fnv1a_bytes(value.as_bytes()) as i64
}

/// JSON hashes its serialized text, matching how it compares.
pub fn hash_json(value: &serde_json::Value) -> i64 {
    hash_str(&value.to_string())
}

/// Seed for folding the hashes of a composite value.
pub fn seed() -> i64 {
    FNV_OFFSET_BASIS as i64
}

/// Fold `hash_b` into `hash_a`.
pub fn combine(hash_a: i64, hash_b: i64) -> i64 {
    let mut hash = hash_a as u64;
    for &b in &(hash_b as u64).to_le_bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}

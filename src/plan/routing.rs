//! Canary bucketing.

/// Stable 32-bit hash of `seed ‖ key`.
fn hash32(seed: &str, key: &str) -> i32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Places `key` in a bucket in `[0, 100)` with 0.0001 resolution.
///
/// The bucket is a pure function of `(seed, key)`, giving every key a stable
/// canary assignment without per-key state.
#[must_use]
pub fn bucket(seed: &str, key: &str) -> f64 {
    let h = hash32(seed, key).unsigned_abs() % 1_000_000;
    f64::from(h) / 10_000.0
}

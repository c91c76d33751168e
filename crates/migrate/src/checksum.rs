//! Migration checksums
//!
//! FNV-1a (64-bit) over the up script, a NUL separator, and the down script.
//! This is drift detection only -- it answers "was this file edited after it
//! was applied?", not "is this file authentic?". Do not use it for anything
//! security-sensitive.

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Compute the checksum of a migration's scripts as a 16-char lowercase hex
/// string. Identical (up, down) pairs always hash identically; the NUL
/// separator keeps `("ab", "c")` distinct from `("a", "bc")`.
pub fn migration_checksum(up: &str, down: Option<&str>) -> String {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in up.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash ^= 0;
    hash = hash.wrapping_mul(FNV_PRIME);
    if let Some(down) = down {
        for byte in down.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    format!("{:016x}", hash)
}

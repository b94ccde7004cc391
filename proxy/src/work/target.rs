use num_bigint::BigUint;

/// Share target for a difficulty: floor((2^256 - 1) / difficulty), big-endian.
///
/// Difficulty 0 is treated as 1. Only forwarded to miners, never compared
/// against locally.
pub fn target_from_difficulty(difficulty: u64) -> [u8; 32] {
    let d = difficulty.max(1);
    let max = BigUint::from_bytes_be(&[0xff; 32]);
    let target = (max / BigUint::from(d)).to_bytes_be();

    let mut out = [0u8; 32];
    out[32 - target.len()..].copy_from_slice(&target);
    out
}

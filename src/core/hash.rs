//! Hash functions fixed by the on-disk formats
//!
//! - Directory entries are keyed by a 32-bit MurmurHash2 of the lower-cased
//!   child name, encoded as UTF-16LE.
//! - The bundle index is keyed by a 64-bit FNV-1a hash of the normalized
//!   logical path.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const MURMUR_M: u32 = 0x5bd1_e995;
const MURMUR_R: u32 = 24;

/// Plain 64-bit FNV-1a over raw bytes
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Normalize a logical path into the string the bundle index hashes.
///
/// File paths are lower-cased; directory paths (trailing `/`) keep their
/// case but lose the trailing slashes. Both get the `++` suffix.
pub fn path_key(path: &str) -> String {
    if path.ends_with('/') {
        format!("{}++", path.trim_end_matches('/'))
    } else {
        format!("{}++", path.to_lowercase())
    }
}

/// Bundle index key for a logical path
pub fn path_hash(path: &str) -> u64 {
    fnv1a64(path_key(path).as_bytes())
}

/// MurmurHash2, 32-bit variant
pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    let mut h = seed ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(MURMUR_M);
        k ^= k >> MURMUR_R;
        k = k.wrapping_mul(MURMUR_M);
        h = h.wrapping_mul(MURMUR_M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= (tail[2] as u32) << 16;
        }
        if tail.len() >= 2 {
            h ^= (tail[1] as u32) << 8;
        }
        h ^= tail[0] as u32;
        h = h.wrapping_mul(MURMUR_M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(MURMUR_M);
    h ^= h >> 15;
    h
}

/// Directory entry key for a child name (case-insensitive by construction)
pub fn name_hash(name: &str) -> u32 {
    let bytes: Vec<u8> = name
        .to_lowercase()
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    murmur2(&bytes, 0)
}

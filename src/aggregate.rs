//! Folding several per-key versions into one tag-safe value.
//!
//! The fold is FNV-1a (64-bit) over the little-endian bytes of each version,
//! in order. It is an order-sensitive fingerprint, not a checksum: the same
//! keys listed in a different order fold to a different value. No seed is
//! involved, so a fold is stable across restarts and machines.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fold of an empty version list.
pub const EMPTY_FOLD: u64 = FNV_OFFSET_BASIS;

/// Folds `versions` into a single `u64`.
///
/// A single version bypasses hashing and is returned as its two's-complement
/// bit pattern (see [`reinterpret`]); two or more are hashed.
pub fn fold(versions: &[i64]) -> u64 {
    match versions {
        [] => EMPTY_FOLD,
        [single] => reinterpret(*single),
        many => fnv1a(many),
    }
}

/// Bit-for-bit conversion of a raw source version into the tag's numeric segment.
#[inline]
pub fn reinterpret(version: i64) -> u64 {
    version as u64
}

fn fnv1a(versions: &[i64]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for version in versions {
        for byte in version.to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference FNV-1a over an arbitrary byte string.
    fn fnv1a_bytes(bytes: &[u8]) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    #[test]
    fn test_reference_vectors() {
        assert_eq!(fnv1a_bytes(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_bytes(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_bytes(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_empty_fold() {
        assert_eq!(fold(&[]), EMPTY_FOLD);
        assert_eq!(fold(&[]), 0xcbf29ce484222325);
    }

    #[test]
    fn test_single_element_is_raw_bits() {
        assert_eq!(fold(&[0]), 0);
        assert_eq!(fold(&[100]), 100);
        assert_eq!(fold(&[i64::MAX]), i64::MAX as u64);
        assert_eq!(fold(&[-1]), u64::MAX);
        // distinct from hashing the same single value
        assert_ne!(fold(&[100]), fnv1a(&[100]));
    }

    #[test]
    fn test_many_hashes_little_endian_bytes() {
        let versions = [10i64, 20, -3];
        let mut bytes = Vec::new();
        for v in versions {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(fold(&versions), fnv1a_bytes(&bytes));
    }

    #[test]
    fn test_deterministic() {
        let versions = [638_412_345_678_901_234i64, 7, 0, 99];
        assert_eq!(fold(&versions), fold(&versions));
        assert_eq!(fold(&versions), fold(&versions.to_vec()));
    }

    #[test]
    fn test_order_sensitive() {
        assert_ne!(fold(&[10, 20]), fold(&[20, 10]));
        assert_ne!(fold(&[1, 2, 3]), fold(&[3, 2, 1]));
    }

    #[test]
    fn test_element_change_changes_fold() {
        let base = fold(&[10, 20, 30]);
        assert_ne!(base, fold(&[10, 20, 31]));
        assert_ne!(base, fold(&[11, 20, 30]));
        assert_ne!(base, fold(&[10, 20, 30, 0]));
    }
}

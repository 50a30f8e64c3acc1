// Hash functions for table names

/// FNV-1a hash implementation for strings
/// Returns a 64-bit integer hash value
pub fn fnv1a_hash(s: &str) -> u64 {
    // FNV-1a constants
    const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET_BASIS;

    // Process each byte in the string
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    hash
}

/// Hash a table name and return an integer
/// Uses FNV-1a as the default hash algorithm
pub fn hash_string(s: &str) -> u64 {
    fnv1a_hash(s)
}

/// Map a name onto one of `buckets` stripes
#[inline]
pub fn bucket_index(s: &str, buckets: usize) -> usize {
    debug_assert!(buckets > 0);
    (hash_string(s) % buckets as u64) as usize
}

//! # Ring Hash Functions
//!
//! Map a byte string to a signed 64-bit ring position. Two algorithms are
//! supported; a ring fixes one at construction so add, remove, and lookup
//! can never mix functions.

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Hash function used for ring placement.
///
/// A closed sum rather than a trait: the algorithm set is fixed and the ring
/// stores the variant by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// First eight bytes of the MD5 digest, assembled big-endian.
    Md5,
    /// FNV-1a over the raw bytes.
    Fnv1a,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Md5
    }
}

impl HashAlgorithm {
    /// Hashes `data` to a signed 64-bit ring position.
    pub fn hash(&self, data: &[u8]) -> i64 {
        match self {
            HashAlgorithm::Md5 => md5_hash64(data),
            HashAlgorithm::Fnv1a => fnv1a_hash64(data),
        }
    }
}

/// Takes bytes 0..8 of the MD5 digest and assembles them big-endian.
fn md5_hash64(data: &[u8]) -> i64 {
    let digest = md5::compute(data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.0[..8]);
    i64::from_be_bytes(head)
}

/// XOR-then-multiply over every byte, standard FNV-1a 64.
fn fnv1a_hash64(data: &[u8]) -> i64 {
    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}

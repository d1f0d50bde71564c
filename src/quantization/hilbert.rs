//! Locality key: a cheap, order-preserving proxy for placing nearby vectors
//! near each other on disk (§4.4).
//!
//! The key is built by taking the first 8 dimensions of a quantized
//! vector's signed bytes, rebasing each to `[0, 255]`, interleaving their
//! bits dimension-major into a 64-bit word, and applying a Gray-code
//! transform so that adjacent cells differ in fewer bits at boundaries.
//! This is not a true Hilbert curve traversal — it is bit interleaving plus
//! Gray coding, a standard cheap substitute that preserves locality well
//! enough for mmap page-access patterns without the recursive quadrant
//! rotation a real Hilbert curve requires. Any order-preserving hash would
//! satisfy the same contract; this one was chosen for its low cost per
//! insert.

use crate::quantization::scalar::QuantizedVector;

const KEY_DIMS: usize = 8;
const KEY_BITS: usize = 8;

fn interleave_bits(coords: [u8; KEY_DIMS]) -> u64 {
    let mut result: u64 = 0;
    for bit in 0..KEY_BITS {
        for (dim, &coord) in coords.iter().enumerate() {
            let b = u64::from((coord >> (KEY_BITS - 1 - bit)) & 1);
            result |= b << (KEY_DIMS * (KEY_BITS - 1 - bit) + (KEY_DIMS - 1 - dim));
        }
    }
    result
}

fn to_gray_code(n: u64) -> u64 {
    n ^ (n >> 1)
}

/// Computes the 64-bit locality key for a quantized vector.
///
/// Nearby vectors tend to produce nearby keys; the engine stores nodes
/// sorted/clustered by this key so that a greedy graph traversal touches
/// fewer distinct mmap pages.
#[must_use]
pub fn locality_key(vector: &QuantizedVector) -> u64 {
    let mut coords = [0u8; KEY_DIMS];
    for (i, c) in coords.iter_mut().enumerate() {
        *c = (i32::from(vector.codes[i]) + 128) as u8;
    }
    to_gray_code(interleave_bits(coords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;

    fn quantized(codes: [i8; KEY_DIMS]) -> QuantizedVector {
        let mut full = [0i8; EMBEDDING_DIM];
        full[..KEY_DIMS].copy_from_slice(&codes);
        QuantizedVector {
            codes: full,
            scale: 1.0,
            offset: 0.0,
        }
    }

    #[test]
    fn identical_vectors_produce_identical_keys() {
        let v = quantized([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(locality_key(&v), locality_key(&v));
    }

    #[test]
    fn all_minimum_codes_key_to_zero() {
        let v = quantized([-128; KEY_DIMS]);
        assert_eq!(locality_key(&v), 0);
    }

    #[test]
    fn nearby_codes_produce_keys_with_small_xor() {
        let a = quantized([0, 0, 0, 0, 0, 0, 0, 0]);
        let b = quantized([1, 0, 0, 0, 0, 0, 0, 0]);
        let xor = locality_key(&a) ^ locality_key(&b);
        assert!(xor.count_ones() <= 2, "expected a near-boundary gray-code flip, got {xor:#b}");
    }
}

//! Sign-bit binary quantization.
//!
//! Compresses a 384-dimensional f32 embedding into a 48-byte
//! [`BinaryVector`]: bit `i` is 1 if `embedding[i] > 0.0`, else 0. Distance
//! between two binary vectors is Hamming distance, computed via
//! [`crate::quantization::popcount::hamming_distance_slice`].
//!
//! Bit ordering is little-endian: byte 0 holds dimensions `[0..8)`, bit 0
//! (LSB) is dimension 0.
//!
//! IEEE-754 edge cases: NaN and -0.0 are not `> 0.0` and quantize to 0;
//! +Inf is `> 0.0` and quantizes to 1; -Inf quantizes to 0.

use crate::quantization::popcount::hamming_distance_slice;
use crate::types::EMBEDDING_DIM;
use bytemuck::{Pod, Zeroable};

/// Byte size of a [`BinaryVector`] (384 bits).
pub const BINARY_VECTOR_BYTES: usize = EMBEDDING_DIM / 8;

const _: () = assert!(BINARY_VECTOR_BYTES == 48);

/// A 384-dimensional embedding compressed to one sign bit per dimension.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BinaryVector {
    data: [u8; BINARY_VECTOR_BYTES],
}

impl BinaryVector {
    /// Builds a `BinaryVector` directly from packed bytes.
    #[must_use]
    pub const fn from_bytes(data: [u8; BINARY_VECTOR_BYTES]) -> Self {
        Self { data }
    }

    /// Borrows the packed byte representation.
    #[must_use]
    pub const fn data(&self) -> &[u8; BINARY_VECTOR_BYTES] {
        &self.data
    }

    /// Hamming distance to another binary vector: number of differing bits.
    #[must_use]
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        hamming_distance_slice(&self.data, &other.data)
    }

    /// Normalized similarity in `[0, 1]`: 1.0 for identical, 0.0 for opposite.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn similarity(&self, other: &Self) -> f32 {
        let distance = self.hamming_distance(other);
        1.0 - (distance as f32 / EMBEDDING_DIM as f32)
    }
}

impl Default for BinaryVector {
    fn default() -> Self {
        Self {
            data: [0u8; BINARY_VECTOR_BYTES],
        }
    }
}

/// Quantizes f32 embeddings into [`BinaryVector`]s by sign bit.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryQuantizer;

impl BinaryQuantizer {
    /// Builds a stateless binary quantizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Quantizes one embedding. `vector` must have exactly `EMBEDDING_DIM` elements.
    ///
    /// # Panics
    ///
    /// Panics if `vector.len() != EMBEDDING_DIM`.
    #[must_use]
    pub fn quantize(&self, vector: &[f32]) -> BinaryVector {
        assert_eq!(
            vector.len(),
            EMBEDDING_DIM,
            "embedding must be {EMBEDDING_DIM}-dimensional, got {}",
            vector.len()
        );

        let mut data = [0u8; BINARY_VECTOR_BYTES];
        for (i, &value) in vector.iter().enumerate() {
            if value > 0.0 {
                data[i / 8] |= 1 << (i % 8);
            }
        }
        BinaryVector { data }
    }

    /// Derives a binary vector from a quantized vector's code signs, so the
    /// two representations of the same embedding never disagree on sign.
    #[must_use]
    pub fn from_quantized(quantized: &super::scalar::QuantizedVector) -> BinaryVector {
        let mut data = [0u8; BINARY_VECTOR_BYTES];
        for (i, &code) in quantized.codes.iter().enumerate() {
            if code > 0 {
                data[i / 8] |= 1 << (i % 8);
            }
        }
        BinaryVector { data }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn valid_vector_strategy() -> impl Strategy<Value = Vec<f32>> {
        proptest::collection::vec(-1.0f32..=1.0f32, EMBEDDING_DIM)
    }

    proptest! {
        #[test]
        fn prop_quantize_deterministic(v in valid_vector_strategy()) {
            let q = BinaryQuantizer::new();
            prop_assert_eq!(q.quantize(&v), q.quantize(&v));
        }

        #[test]
        fn prop_self_distance_zero(v in valid_vector_strategy()) {
            let q = BinaryQuantizer::new();
            let qv = q.quantize(&v);
            prop_assert_eq!(qv.hamming_distance(&qv), 0);
        }

        #[test]
        fn prop_hamming_symmetric(v1 in valid_vector_strategy(), v2 in valid_vector_strategy()) {
            let q = BinaryQuantizer::new();
            let a = q.quantize(&v1);
            let b = q.quantize(&v2);
            prop_assert_eq!(a.hamming_distance(&b), b.hamming_distance(&a));
        }

        #[test]
        fn prop_hamming_bounded(v1 in valid_vector_strategy(), v2 in valid_vector_strategy()) {
            let q = BinaryQuantizer::new();
            let a = q.quantize(&v1);
            let b = q.quantize(&v2);
            prop_assert!(a.hamming_distance(&b) <= EMBEDDING_DIM as u32);
        }

        #[test]
        fn prop_similarity_bounded(v1 in valid_vector_strategy(), v2 in valid_vector_strategy()) {
            let q = BinaryQuantizer::new();
            let a = q.quantize(&v1);
            let b = q.quantize(&v2);
            let sim = a.similarity(&b);
            prop_assert!((0.0..=1.0).contains(&sim));
        }

        #[test]
        fn prop_triangle_inequality(
            v1 in valid_vector_strategy(),
            v2 in valid_vector_strategy(),
            v3 in valid_vector_strategy()
        ) {
            let q = BinaryQuantizer::new();
            let a = q.quantize(&v1);
            let b = q.quantize(&v2);
            let c = q.quantize(&v3);
            let d_ab = a.hamming_distance(&b);
            let d_bc = b.hamming_distance(&c);
            let d_ac = a.hamming_distance(&c);
            prop_assert!(d_ac <= d_ab + d_bc);
        }

        #[test]
        fn prop_output_size_constant(v in valid_vector_strategy()) {
            let q = BinaryQuantizer::new();
            prop_assert_eq!(q.quantize(&v).data().len(), BINARY_VECTOR_BYTES);
        }
    }
}

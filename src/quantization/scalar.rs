//! Symmetric signed 8-bit scalar quantization.
//!
//! Maps a 384-dimensional f32 embedding to a 392-byte `QuantizedVector`:
//! 384 signed bytes plus a `scale`/`offset` pair that recovers the original
//! range on dequantization. Unlike an unsigned `[0, 255]` min-max scheme,
//! the quantized range is `[-127, 127]`, leaving `-128` unused so the
//! encoding is symmetric around zero.
//!
//! The mapping is per-vector: each embedding's own min/max determines its
//! `scale`/`offset`, so no shared or trained quantizer state is needed and
//! two vectors stored at different times never interfere with each other's
//! precision.

use crate::types::EMBEDDING_DIM;
use bytemuck::{Pod, Zeroable};

/// Byte size of [`QuantizedVector`] (384 + 4 + 4).
pub const QUANTIZED_VECTOR_BYTES: usize = EMBEDDING_DIM + 8;

const _: () = assert!(QUANTIZED_VECTOR_BYTES == 392);

/// The fixed on-disk quantized form of a 384-dimensional embedding.
///
/// `codes[i]` is the signed affine-quantized value of `embedding[i]`;
/// recovering the float requires `scale` and `offset`:
/// `embedding[i] ≈ codes[i] as f32 * scale + offset`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuantizedVector {
    /// Signed quantized codes, one per dimension, in `[-127, 127]`.
    pub codes: [i8; EMBEDDING_DIM],
    /// Multiplicative scale recovered during dequantization.
    pub scale: f32,
    /// Additive offset recovered during dequantization.
    pub offset: f32,
}

const _: () = assert!(std::mem::size_of::<QuantizedVector>() == QUANTIZED_VECTOR_BYTES);

/// Quantizes one embedding into its 392-byte symmetric signed form using
/// the vector's own min/max.
///
/// Non-finite values are treated as the midpoint of the observed range. A
/// degenerate range (all values equal, or all non-finite) quantizes every
/// code to zero.
///
/// # Panics
///
/// Panics if `vector.len() != EMBEDDING_DIM`.
#[must_use]
pub fn quantize(vector: &[f32]) -> QuantizedVector {
    assert_eq!(vector.len(), EMBEDDING_DIM, "embedding dimension mismatch");

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for &val in vector {
        if val.is_finite() {
            min = min.min(val);
            max = max.max(val);
        }
    }
    if min > max {
        min = -1.0;
        max = 1.0;
    }

    let range = max - min;
    let mid = (max + min) * 0.5;
    let (scale, offset) = if range.abs() < f32::EPSILON {
        (1.0, mid)
    } else {
        (range / 2.0 / 127.0, mid)
    };

    let mut codes = [0i8; EMBEDDING_DIM];
    for (i, &val) in vector.iter().enumerate() {
        let v = if val.is_finite() { val } else { mid };
        let normalized = if scale.abs() < f32::EPSILON {
            0.0
        } else {
            (v - offset) / scale
        };
        codes[i] = normalized.round().clamp(-127.0, 127.0) as i8;
    }

    QuantizedVector {
        codes,
        scale,
        offset,
    }
}

/// Recovers an approximate float embedding from its quantized form.
#[must_use]
pub fn dequantize(quantized: &QuantizedVector) -> Vec<f32> {
    quantized
        .codes
        .iter()
        .map(|&c| f32::from(c) * quantized.scale + quantized.offset)
        .collect()
}

/// Approximate cosine similarity between two quantized vectors' codes.
///
/// Used for the rerank pass of two-stage search: codes stand in for the
/// original floats, which holds up well since both sides round to the same
/// 255-level resolution regardless of their individual scale/offset.
#[must_use]
pub fn quantized_cosine(a: &QuantizedVector, b: &QuantizedVector) -> f32 {
    let mut dot = 0i64;
    let mut norm_a = 0i64;
    let mut norm_b = 0i64;
    for i in 0..EMBEDDING_DIM {
        let ca = i64::from(a.codes[i]);
        let cb = i64::from(b.codes[i]);
        dot += ca * cb;
        norm_a += ca * ca;
        norm_b += cb * cb;
    }
    if norm_a == 0 || norm_b == 0 {
        return 0.0;
    }
    dot as f32 / ((norm_a as f32).sqrt() * (norm_b as f32).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vector(seed: f32) -> Vec<f32> {
        (0..EMBEDDING_DIM)
            .map(|i| ((i as f32) * 0.01 + seed).sin())
            .collect()
    }

    #[test]
    fn quantize_roundtrip_is_close() {
        let v = sample_vector(0.0);
        let quantized = quantize(&v);
        let restored = dequantize(&quantized);
        for (orig, got) in v.iter().zip(restored.iter()) {
            assert!((orig - got).abs() < 0.05, "orig={orig} got={got}");
        }
    }

    #[test]
    fn codes_stay_within_signed_range() {
        let v = sample_vector(1.0);
        let quantized = quantize(&v);
        for &c in &quantized.codes {
            assert!(c >= -127);
        }
    }

    #[test]
    fn degenerate_range_quantizes_to_zero() {
        let v = vec![0.5f32; EMBEDDING_DIM];
        let quantized = quantize(&v);
        assert!(quantized.codes.iter().all(|&c| c == 0));
    }

    #[test]
    fn non_finite_values_fall_back_to_midpoint() {
        let mut v = vec![f32::NAN; EMBEDDING_DIM];
        v[0] = 1.0;
        v[1] = -1.0;
        let quantized = quantize(&v);
        // NaN entries quantize to the midpoint code (0), the finite
        // entries land at the extremes of the observed range.
        assert_eq!(quantized.codes[2], 0);
        assert_eq!(quantized.codes[0], 127);
        assert_eq!(quantized.codes[1], -127);
    }

    #[test]
    fn self_similarity_is_one() {
        let v = sample_vector(2.0);
        let quantized = quantize(&v);
        let sim = quantized_cosine(&quantized, &quantized);
        assert!((sim - 1.0).abs() < 1e-4);
    }

    #[test]
    fn two_vectors_quantize_independently() {
        // Different per-vector ranges must not distort the comparison: two
        // identical unit vectors at different scales still self-compare to 1.
        let narrow: Vec<f32> = sample_vector(0.0).iter().map(|v| v * 0.01).collect();
        let wide: Vec<f32> = sample_vector(0.0).iter().map(|v| v * 100.0).collect();
        let qn = quantize(&narrow);
        let qw = quantize(&wide);
        let sim = quantized_cosine(&qn, &qw);
        assert!(sim > 0.99, "expected near-identical direction, got {sim}");
    }

    #[test]
    fn quantized_vector_is_392_bytes() {
        assert_eq!(std::mem::size_of::<QuantizedVector>(), 392);
    }

    #[test]
    #[should_panic(expected = "embedding dimension mismatch")]
    fn quantize_rejects_wrong_dimension() {
        quantize(&[0.0; 10]);
    }
}

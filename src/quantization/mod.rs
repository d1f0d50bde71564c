//! Vector quantization: the three on-disk representations of an embedding
//! (float, quantized, binary) and the locality key derived from the
//! quantized form.

/// Symmetric signed 8-bit scalar quantization (392-byte `QuantizedVector`).
pub mod scalar;

/// Sign-bit binary quantization (48-byte `BinaryVector`).
pub mod binary;

/// Space-filling-curve locality key derived from a quantized vector.
pub mod hilbert;

/// Byte-wise Hamming distance helper shared by [`binary`].
pub mod popcount;

pub use binary::{BinaryQuantizer, BinaryVector, BINARY_VECTOR_BYTES};
pub use hilbert::locality_key;
pub use scalar::{dequantize, quantize, quantized_cosine, QuantizedVector, QUANTIZED_VECTOR_BYTES};

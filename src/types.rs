//! Caller-facing data model: node identifiers, edges, confidence, and the
//! `Node` value passed across the façade boundary.

use serde::{Deserialize, Serialize};

/// A 128-bit globally unique, caller-assigned identifier for a node.
///
/// Represented as two 64-bit halves rather than a single `u128` so that the
/// on-disk layout matches the `IndexedNode`/`NodeMeta` field order exactly
/// (`id_high`, `id_low`) without relying on platform-specific `u128` ABI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// High 64 bits.
    pub high: u64,
    /// Low 64 bits.
    pub low: u64,
}

impl NodeId {
    /// The reserved sentinel id, never assigned to a live node.
    pub const NIL: NodeId = NodeId { high: 0, low: 0 };

    /// Builds a `NodeId` from a `u128`.
    #[must_use]
    pub fn from_u128(v: u128) -> Self {
        Self {
            high: (v >> 64) as u64,
            low: v as u64,
        }
    }

    /// Returns the `u128` representation.
    #[must_use]
    pub fn as_u128(self) -> u128 {
        (u128::from(self.high) << 64) | u128::from(self.low)
    }
}

impl From<u128> for NodeId {
    fn from(v: u128) -> Self {
        Self::from_u128(v)
    }
}

/// Dense 32-bit index into the slot array. `SlotId::INVALID` denotes "no slot".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl SlotId {
    /// The sentinel value meaning "no slot" (`UINT32_MAX`).
    pub const INVALID: SlotId = SlotId(u32::MAX);

    /// Returns true if this is the invalid sentinel.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// An ordered, typed edge from one node to another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// The id of the node this edge points to.
    pub target_id: NodeId,
    /// Caller-defined edge type tag.
    pub edge_type_tag: u32,
    /// Edge weight, interpreted entirely by the caller.
    pub weight: f32,
}

/// A confidence estimate the engine stores but never interprets.
///
/// `mu` is the current estimate in `[0, 1]`, `sigma_sq` is the uncertainty
/// about that estimate, and `n` is the number of observations that produced
/// it. The triple is preserved verbatim through every round trip; decay
/// schedules and coherence scoring are a caller concern out of scope here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// Current estimate in `[0, 1]`.
    pub mu: f32,
    /// Variance of the estimate.
    pub sigma_sq: f32,
    /// Observation count.
    pub n: u32,
}

/// Caller-facing node value: everything needed to `insert` or returned by `get`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique identifier, assigned by the caller.
    pub id: NodeId,
    /// Caller-defined type discriminator.
    pub type_tag: u32,
    /// Creation timestamp (caller-defined unit, typically unix millis).
    pub created_at: u64,
    /// Last-accessed timestamp. May advance without a WAL entry.
    pub accessed_at: u64,
    /// Caller-interpreted decay rate.
    pub decay_rate: f32,
    /// Confidence triple; see [`Confidence`].
    pub confidence: Confidence,
    /// 384-dimensional float embedding.
    pub embedding: Vec<f32>,
    /// Opaque payload bytes (seed text or a serialized structure).
    pub payload_bytes: Vec<u8>,
    /// Ordered outgoing edges.
    pub edges: Vec<Edge>,
    /// Unordered set of short tag strings.
    pub tags: Vec<String>,
}

/// The fixed embedding dimensionality this engine is specified for.
pub const EMBEDDING_DIM: usize = 384;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_u128_roundtrip() {
        let v: u128 = 0x1122_3344_5566_7788_99AA_BBCC_DDEE_FF00;
        let id = NodeId::from_u128(v);
        assert_eq!(id.as_u128(), v);
    }

    #[test]
    fn slot_id_invalid_sentinel() {
        assert!(!SlotId::INVALID.is_valid());
        assert!(SlotId(0).is_valid());
    }
}

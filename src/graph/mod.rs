//! Hierarchical proximity graph algorithms: level assignment, best-first
//! layer search, and neighbor selection.
//!
//! This module is storage-agnostic. It operates purely on [`SlotId`]s and
//! caller-supplied distance/neighbor closures; the unified index owns the
//! actual connection pool and vector storage and wires the two together.

use crate::types::SlotId;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// A slot paired with its distance to some fixed query, ordered so that
/// collections built from it can be used directly as either a min-heap (by
/// wrapping in `Reverse`) or a max-heap of candidates to prune.
#[derive(Clone, Copy, Debug)]
pub struct Scored {
    /// Distance to the query; lower is closer.
    pub distance: f32,
    /// The slot this score belongs to.
    pub slot: SlotId,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.slot == other.slot
    }
}
impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

/// Assigns a random layer for a newly inserted node using the standard HNSW
/// geometric distribution with `1/ln(m)` decay, capped at `max_level`.
#[must_use]
pub fn assign_level(rng: &mut impl Rng, m: u32, max_level: u8) -> u8 {
    let lambda = 1.0 / (m.max(2) as f64).ln();
    let r: f64 = rng.gen_range(f64::EPSILON..1.0);
    let level = (-r.ln() * lambda).floor() as u64;
    level.min(u64::from(max_level)) as u8
}

/// Best-first search of a single layer, starting from `entry_points` and
/// expanding up to `ef` candidates before returning the closest ones found.
///
/// `distance` computes the query distance to a slot; `neighbors` returns a
/// slot's out-edges at `layer`.
pub fn search_layer(
    entry_points: &[SlotId],
    layer: u8,
    ef: usize,
    mut distance: impl FnMut(SlotId) -> f32,
    mut neighbors: impl FnMut(SlotId, u8) -> Vec<SlotId>,
) -> Vec<Scored> {
    let mut visited: HashSet<SlotId> = entry_points.iter().copied().collect();
    let mut candidates: BinaryHeap<std::cmp::Reverse<Scored>> = BinaryHeap::new();
    let mut results: BinaryHeap<Scored> = BinaryHeap::new();

    for &ep in entry_points {
        let d = distance(ep);
        candidates.push(std::cmp::Reverse(Scored { distance: d, slot: ep }));
        results.push(Scored { distance: d, slot: ep });
    }

    while let Some(std::cmp::Reverse(current)) = candidates.pop() {
        let worst_in_results = results.peek().map(|s| s.distance);
        if let Some(worst) = worst_in_results {
            if results.len() >= ef && current.distance > worst {
                break;
            }
        }

        for candidate_slot in neighbors(current.slot, layer) {
            if !visited.insert(candidate_slot) {
                continue;
            }
            let d = distance(candidate_slot);
            let worst = results.peek().map(|s| s.distance);
            if results.len() < ef || worst.map_or(true, |w| d < w) {
                candidates.push(std::cmp::Reverse(Scored {
                    distance: d,
                    slot: candidate_slot,
                }));
                results.push(Scored {
                    distance: d,
                    slot: candidate_slot,
                });
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut out: Vec<Scored> = results.into_vec();
    out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    out
}

/// Greedily descends from `entry_point` at `top_layer` down to layer 1,
/// taking the single closest neighbor at each layer as the next entry
/// point, then runs a wide [`search_layer`] at layer 0 and returns the
/// closest `k`.
pub fn search(
    entry_point: SlotId,
    top_layer: u8,
    ef_search: usize,
    k: usize,
    mut distance: impl FnMut(SlotId) -> f32,
    mut neighbors: impl FnMut(SlotId, u8) -> Vec<SlotId>,
) -> Vec<Scored> {
    let mut current = entry_point;
    for layer in (1..=top_layer).rev() {
        let found = search_layer(&[current], layer, 1, &mut distance, &mut neighbors);
        if let Some(best) = found.into_iter().next() {
            current = best.slot;
        }
    }
    let mut results = search_layer(&[current], 0, ef_search.max(k), &mut distance, &mut neighbors);
    results.truncate(k);
    results
}

/// Selects up to `m` neighbors from `candidates`, nearest-first.
///
/// This is the simple selection heuristic (closest-`m`), not the
/// diversity-aware heuristic from the original HNSW paper; it is adequate
/// at the graph sizes this engine targets and keeps neighbor maintenance
/// free of an extra distance-matrix pass.
#[must_use]
pub fn select_neighbors(mut candidates: Vec<Scored>, m: usize) -> Vec<Scored> {
    candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    candidates.truncate(m);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;

    #[test]
    fn assign_level_is_capped() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..10_000 {
            let level = assign_level(&mut rng, 16, 16);
            assert!(level <= 16);
        }
    }

    #[test]
    fn assign_level_mostly_zero() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let zero_count = (0..1000).filter(|_| assign_level(&mut rng, 16, 16) == 0).count();
        assert!(zero_count > 700, "expected most levels to be 0, got {zero_count}/1000");
    }

    // A tiny fixed graph: a chain 0-1-2-3-4 at layer 0, for search_layer tests.
    fn chain_neighbors(slot: SlotId, _layer: u8) -> Vec<SlotId> {
        let i = slot.0;
        let mut out = Vec::new();
        if i > 0 {
            out.push(SlotId(i - 1));
        }
        out.push(SlotId(i + 1));
        out
    }

    fn chain_distance(target: u32) -> impl FnMut(SlotId) -> f32 {
        move |s| (s.0 as f32 - target as f32).abs()
    }

    #[test]
    fn search_layer_finds_closest() {
        let results = search_layer(
            &[SlotId(0)],
            0,
            3,
            chain_distance(4),
            |s, l| {
                if s.0 >= 10 {
                    Vec::new()
                } else {
                    chain_neighbors(s, l)
                }
            },
        );
        assert_eq!(results[0].slot, SlotId(4));
    }

    #[test]
    fn select_neighbors_truncates_sorted() {
        let candidates = vec![
            Scored { distance: 3.0, slot: SlotId(3) },
            Scored { distance: 1.0, slot: SlotId(1) },
            Scored { distance: 2.0, slot: SlotId(2) },
        ];
        let selected = select_neighbors(candidates, 2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].slot, SlotId(1));
        assert_eq!(selected[1].slot, SlotId(2));
    }

    #[test]
    fn search_descends_then_widens() {
        // Layer 1 only connects entry 0 to 2; layer 0 is the full chain.
        let mut layer1: HashMap<u32, Vec<u32>> = HashMap::new();
        layer1.insert(0, vec![2]);
        layer1.insert(2, vec![0]);

        let neighbors = |s: SlotId, layer: u8| -> Vec<SlotId> {
            if layer == 0 {
                chain_neighbors(s, layer)
            } else {
                layer1
                    .get(&s.0)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(SlotId)
                    .collect()
            }
        };
        let results = search(SlotId(0), 1, 10, 1, chain_distance(4), neighbors);
        assert_eq!(results[0].slot, SlotId(4));
    }
}

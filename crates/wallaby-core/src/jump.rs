//! Precomputed pseudorandom jump table.
//!
//! A walk's next jump is picked by hashing its current point into this
//! table, so two walks that land on the same point follow the same path
//! from there on — the property the whole kangaroo method rests on.

use crate::group::{Group, PointBytes};

/// Number of jumps in the table. Small enough to stay resident in GPU
/// shared memory; the selection mask assumes a power of two.
pub const JUMP_COUNT: usize = 32;

/// Fixed table of `(distance, distance·G)` pairs derived from a seed.
///
/// Jump distances are uniform in `[1, 2^(half+1))` with
/// `half = range_bits / 2`, putting the mean near √(range width) — the
/// optimum step size for the method. Derivation is deterministic: the
/// same `(seed, range_bits)` yields the same table on every machine.
///
/// Workers with different seeds can feed the same merge server: a walk's
/// correctness depends only on its own table being fixed, not on tables
/// agreeing across workers.
pub struct JumpSet<G: Group> {
    distances: Vec<G::Scalar>,
    points: Vec<G::Point>,
}

impl<G: Group> JumpSet<G> {
    pub fn derive(group: &G, seed: u64, range_bits: u8) -> Self {
        let half = (range_bits / 2).min(62);
        let span = 1u64 << (half + 1);

        let mut distances = Vec::with_capacity(JUMP_COUNT);
        let mut points = Vec::with_capacity(JUMP_COUNT);
        for i in 0..JUMP_COUNT {
            let mut hasher = blake3::Hasher::new();
            hasher.update(b"wallaby.jump");
            hasher.update(&seed.to_le_bytes());
            hasher.update(&(i as u32).to_le_bytes());
            let digest = hasher.finalize();
            let mut word = [0u8; 8];
            word.copy_from_slice(&digest.as_bytes()[0..8]);
            let magnitude = (u64::from_le_bytes(word) % span).max(1);

            let distance = group.scalar_from_u64(magnitude);
            points.push(group.mul(&distance));
            distances.push(distance);
        }
        JumpSet { distances, points }
    }

    /// Which jump a point takes next. Reads encoding bytes 8..16 so the
    /// DP mask (bytes 0..8) does not bias the choice.
    pub fn index_of(encoding: &PointBytes) -> usize {
        let mut word = [0u8; 8];
        word.copy_from_slice(&encoding[8..16]);
        (u64::from_le_bytes(word) as usize) & (JUMP_COUNT - 1)
    }

    pub fn jump(&self, index: usize) -> (&G::Scalar, &G::Point) {
        (&self.distances[index], &self.points[index])
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

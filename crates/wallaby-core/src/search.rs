//! Herd planning and the shared search identity.
//!
//! A herd is a population of walks sharing a starting offset. The offsets
//! are what make a collision solvable: every record names its herd, and
//! the solver turns (herd offset, accumulated distance) pairs back into
//! the target scalar. Workers and the server must therefore derive the
//! exact same plan from the exact same configuration — the search digest
//! in the handshake enforces that.

use crate::group::{scalar_pow2, Group, PointBytes};
use crate::wire::Kind;

#[derive(Debug, Clone)]
pub struct Herd<S> {
    pub id: u16,
    pub kind: Kind,
    /// Starting multiple: a tame walk starts at `offset·G`, a wild walk
    /// at `P + offset·G`.
    pub offset: S,
}

/// The full set of herds for one search.
#[derive(Debug, Clone)]
pub struct HerdPlan<G: Group> {
    herds: Vec<Herd<G::Scalar>>,
}

impl<G: Group> HerdPlan<G> {
    /// Deterministic plan: tame herds sit at the middle of the interval
    /// `[range_start, range_start + 2^range_bits)`, staggered by +1 each;
    /// wild herd 0 has offset zero (distances measured straight from P),
    /// further wild herds stagger the same way.
    pub fn build(
        group: &G,
        range_start: &G::Scalar,
        range_bits: u8,
        tame_herds: u16,
        wild_herds: u16,
    ) -> Self {
        let mid = group.scalar_add(range_start, &scalar_pow2(group, range_bits.saturating_sub(1)));

        let mut herds = Vec::with_capacity(tame_herds as usize + wild_herds as usize);
        for i in 0..tame_herds {
            herds.push(Herd {
                id: i,
                kind: Kind::Tame,
                offset: group.scalar_add(&mid, &group.scalar_from_u64(i as u64)),
            });
        }
        for j in 0..wild_herds {
            herds.push(Herd {
                id: tame_herds + j,
                kind: Kind::Wild,
                offset: group.scalar_from_u64(j as u64),
            });
        }
        HerdPlan { herds }
    }

    /// Assemble a plan from explicit herds. Ids must equal their index.
    pub fn from_herds(herds: Vec<Herd<G::Scalar>>) -> Self {
        debug_assert!(herds.iter().enumerate().all(|(i, h)| h.id as usize == i));
        HerdPlan { herds }
    }

    pub fn herds(&self) -> &[Herd<G::Scalar>] {
        &self.herds
    }

    pub fn get(&self, id: u16) -> Option<&Herd<G::Scalar>> {
        self.herds.get(id as usize)
    }
}

/// Everything both sides must agree on for one search, plus the digest
/// that proves they do. Immutable for the lifetime of the search.
#[derive(Clone)]
pub struct SearchContext<G: Group> {
    pub group: G,
    /// The point whose discrete log is wanted.
    pub target: G::Point,
    pub plan: HerdPlan<G>,
    pub dp_bits: u8,
}

impl<G: Group> SearchContext<G> {
    pub fn new(group: G, target: G::Point, plan: HerdPlan<G>, dp_bits: u8) -> Self {
        SearchContext {
            group,
            target,
            plan,
            dp_bits,
        }
    }

    /// BLAKE3 digest over the group parameters, the target, and the herd
    /// plan. Jump seeds are deliberately excluded: workers with different
    /// jump tables still produce mergeable records.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"wallaby.search");
        hasher.update(&self.group.params_digest());
        hasher.update(&self.group.encode_point(&self.target));
        hasher.update(&(self.plan.herds.len() as u32).to_le_bytes());
        for herd in &self.plan.herds {
            hasher.update(&herd.id.to_le_bytes());
            hasher.update(&[herd.kind as u8]);
            hasher.update(&self.group.encode_scalar(&herd.offset));
        }
        *hasher.finalize().as_bytes()
    }

    pub fn target_encoding(&self) -> PointBytes {
        self.group.encode_point(&self.target)
    }
}

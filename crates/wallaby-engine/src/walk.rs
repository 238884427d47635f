//! Walk state and the engine boundary.
//!
//! The engine interface is batched because the real workhorse advances
//! thousands of kangaroos per kernel dispatch. The core assumes nothing
//! about how a batch is computed — only that the engine returns one
//! result per input, in input order, and behaves deterministically for
//! identical jump tables and input states.

use wallaby_core::dp::DpMask;
use wallaby_core::group::Group;
use wallaby_core::jump::JumpSet;
use wallaby_core::search::SearchContext;
use wallaby_core::wire::Kind;

/// Transient walk state. Lives only inside the walk/buffer pipeline;
/// distinguished landings are copied out as records, never the kangaroo.
///
/// Invariant maintained by seeding and by every jump:
/// `point = base(kind) + (herd_offset + distance)·G`, with
/// `base(Tame) = 0` and `base(Wild) = P`.
#[derive(Debug, Clone)]
pub struct Kangaroo<G: Group> {
    pub point: G::Point,
    pub distance: G::Scalar,
    pub kind: Kind,
    pub herd: u16,
}

/// Advances batches of kangaroos. Implemented here on the CPU; the GPU
/// path implements the same contract behind a kernel dispatch.
pub trait WalkEngine<G: Group>: Send {
    /// Advance every kangaroo by one jump, updating state in place.
    /// Returns one flag per input, in input order: `true` if the kangaroo
    /// landed on a distinguished point.
    fn advance(&mut self, batch: &mut [Kangaroo<G>]) -> Vec<bool>;
}

/// Reference engine: one point addition per kangaroo per jump.
pub struct CpuWalkEngine<G: Group> {
    group: G,
    jumps: JumpSet<G>,
    mask: DpMask,
}

impl<G: Group> CpuWalkEngine<G> {
    pub fn new(group: G, jumps: JumpSet<G>, mask: DpMask) -> Self {
        CpuWalkEngine { group, jumps, mask }
    }
}

impl<G: Group> WalkEngine<G> for CpuWalkEngine<G> {
    fn advance(&mut self, batch: &mut [Kangaroo<G>]) -> Vec<bool> {
        let mut flags = Vec::with_capacity(batch.len());
        for roo in batch.iter_mut() {
            let here = self.group.encode_point(&roo.point);
            let (jump_distance, jump_point) = self.jumps.jump(JumpSet::<G>::index_of(&here));

            roo.point = self.group.add(&roo.point, jump_point);
            roo.distance = self.group.scalar_add(&roo.distance, jump_distance);

            let landed = self.group.encode_point(&roo.point);
            flags.push(self.mask.is_distinguished(&landed));
        }
        flags
    }
}

/// Seed one lane of kangaroos from the herd plan, herds interleaved
/// round-robin. Kangaroo j starts with distance `stagger + j`, placing it
/// at `base + (offset + stagger + j)·G` — the walk invariant holds from
/// step zero. Distinct staggers keep lanes (and workers) from replaying
/// each other's walks.
pub fn seed_lane<G: Group>(ctx: &SearchContext<G>, width: usize, stagger: u64) -> Vec<Kangaroo<G>> {
    let herds = ctx.plan.herds();
    (0..width)
        .map(|j| seed_kangaroo(ctx, &herds[j % herds.len()], stagger.wrapping_add(j as u64)))
        .collect()
}

/// Seed a lane from a single herd. Lanes are commonly pinned to one
/// population — a whole dispatch then shares its base-point math.
/// Unknown herd ids seed nothing.
pub fn seed_herd<G: Group>(
    ctx: &SearchContext<G>,
    herd_id: u16,
    width: usize,
    stagger: u64,
) -> Vec<Kangaroo<G>> {
    let Some(herd) = ctx.plan.get(herd_id) else {
        return Vec::new();
    };
    (0..width)
        .map(|j| seed_kangaroo(ctx, herd, stagger.wrapping_add(j as u64)))
        .collect()
}

fn seed_kangaroo<G: Group>(
    ctx: &SearchContext<G>,
    herd: &wallaby_core::search::Herd<G::Scalar>,
    start: u64,
) -> Kangaroo<G> {
    let group = &ctx.group;
    let distance = group.scalar_from_u64(start);
    let walked = group.scalar_add(&herd.offset, &distance);
    let point = match herd.kind {
        Kind::Tame => group.mul(&walked),
        Kind::Wild => group.add(&ctx.target, &group.mul(&walked)),
    };
    Kangaroo {
        point,
        distance,
        kind: herd.kind,
        herd: herd.id,
    }
}

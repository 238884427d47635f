//! Scalar recovery from a tame/wild collision.

use crate::dp::DpRecord;
use crate::group::Group;
use crate::search::SearchContext;
use crate::wire::Kind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolveError {
    /// The pair cannot yield a solution — bad herd reference, same-kind
    /// records, mismatched points, or an undecodable distance. Points at
    /// an accounting or configuration bug, never at bad luck.
    #[error("no solution from this pair: {0}")]
    NoSolution(&'static str),

    /// The arithmetic checked out but `k·G ≠ P`: a false positive
    /// (hash-prefix collision or corrupt bookkeeping). The search must
    /// resume; the recovered value must never be trusted.
    #[error("recovered scalar failed verification against the target")]
    VerificationFailed,
}

/// Recover the discrete log from two records on the same point with
/// differing kind. Accepts the pair in either order.
///
/// A tame walk sits at `(o_t + d_t)·G`, a wild walk at `P + (o_w + d_w)·G`.
/// Equal points mean `k = o_t + d_t − o_w − d_w (mod order)`; with wild
/// herd 0 at offset zero this is the familiar `k = offset_tame + d_t − d_w`.
/// The result is always verified against the target before being returned.
pub fn solve<G: Group>(
    ctx: &SearchContext<G>,
    a: &DpRecord,
    b: &DpRecord,
) -> Result<G::Scalar, SolveError> {
    let (tame, wild) = match (a.kind, b.kind) {
        (Kind::Tame, Kind::Wild) => (a, b),
        (Kind::Wild, Kind::Tame) => (b, a),
        _ => return Err(SolveError::NoSolution("records are the same kind")),
    };
    if tame.point != wild.point {
        return Err(SolveError::NoSolution("records are for different points"));
    }

    let group = &ctx.group;
    let tame_herd = ctx
        .plan
        .get(tame.herd)
        .filter(|h| h.kind == Kind::Tame)
        .ok_or(SolveError::NoSolution("unknown tame herd"))?;
    let wild_herd = ctx
        .plan
        .get(wild.herd)
        .filter(|h| h.kind == Kind::Wild)
        .ok_or(SolveError::NoSolution("unknown wild herd"))?;

    let d_t = group
        .decode_scalar(&tame.distance)
        .ok_or(SolveError::NoSolution("tame distance does not decode"))?;
    let d_w = group
        .decode_scalar(&wild.distance)
        .ok_or(SolveError::NoSolution("wild distance does not decode"))?;

    let tame_total = group.scalar_add(&tame_herd.offset, &d_t);
    let wild_total = group.scalar_add(&wild_herd.offset, &d_w);
    let k = group.scalar_sub(&tame_total, &wild_total);

    if group.encode_point(&group.mul(&k)) == group.encode_point(&ctx.target) {
        Ok(k)
    } else {
        Err(SolveError::VerificationFailed)
    }
}

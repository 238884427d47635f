//! The narrow interface to curve arithmetic.
//!
//! The coordination core never does point math itself — it moves canonical
//! 32-byte encodings around and hands arithmetic to a [`Group`]
//! implementation. That keeps the hot path (GPU kernels, batched adds)
//! entirely behind this seam and lets tests run the full pipeline on a
//! group small enough to inspect by hand.

/// Canonical 32-byte point encoding. Equality and hashing inside the
/// coordination core are defined over this encoding.
pub type PointBytes = [u8; 32];

/// Canonical 32-byte scalar encoding.
pub type ScalarBytes = [u8; 32];

/// A cyclic group of known prime order with a fixed generator G.
///
/// All scalar operations reduce modulo the group order — walk distances
/// are meaningful only modulo that order, and the solver relies on it.
pub trait Group: Clone + Send + Sync + 'static {
    type Point: Clone + PartialEq + Send + Sync + std::fmt::Debug;
    type Scalar: Clone + PartialEq + Send + Sync + std::fmt::Debug;

    /// Canonical parameter name, e.g. `"wallaby.group.ristretto255"`.
    /// Feeds the default [`Group::params_digest`].
    fn name(&self) -> &'static str;

    fn generator(&self) -> Self::Point;

    fn add(&self, a: &Self::Point, b: &Self::Point) -> Self::Point;

    /// k·G.
    fn mul(&self, k: &Self::Scalar) -> Self::Point;

    fn scalar_add(&self, a: &Self::Scalar, b: &Self::Scalar) -> Self::Scalar;

    fn scalar_sub(&self, a: &Self::Scalar, b: &Self::Scalar) -> Self::Scalar;

    fn scalar_from_u64(&self, v: u64) -> Self::Scalar;

    /// Reduce 32 hash-derived bytes into a scalar. Used when deriving
    /// jump distances; need not be injective.
    fn scalar_from_hash(&self, bytes: &[u8; 32]) -> Self::Scalar;

    fn encode_point(&self, p: &Self::Point) -> PointBytes;

    /// None if the bytes are not a canonical encoding of a group element.
    fn decode_point(&self, bytes: &PointBytes) -> Option<Self::Point>;

    fn encode_scalar(&self, s: &Self::Scalar) -> ScalarBytes;

    /// None if the bytes are not a canonical reduced scalar.
    fn decode_scalar(&self, bytes: &ScalarBytes) -> Option<Self::Scalar>;

    /// Stable digest of the group parameters. Implementations whose
    /// parameters go beyond the name (moduli, cofactors) must fold them in.
    fn params_digest(&self) -> [u8; 32] {
        *blake3::hash(self.name().as_bytes()).as_bytes()
    }
}

/// 2^exp as a scalar, by repeated doubling. Handles exponents past the
/// u64 range, which search intervals on real curves need.
pub fn scalar_pow2<G: Group>(group: &G, exp: u8) -> G::Scalar {
    let mut x = group.scalar_from_u64(1);
    for _ in 0..exp {
        x = group.scalar_add(&x, &x);
    }
    x
}

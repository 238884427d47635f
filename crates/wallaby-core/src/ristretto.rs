//! Ristretto255 — the production group.
//!
//! Backed by curve25519-dalek. The compressed Ristretto encoding is the
//! canonical point encoding; scalars are canonical little-endian mod ℓ.

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;

use crate::group::{Group, PointBytes, ScalarBytes};

#[derive(Debug, Clone, Copy, Default)]
pub struct Ristretto;

impl Group for Ristretto {
    type Point = RistrettoPoint;
    type Scalar = Scalar;

    fn name(&self) -> &'static str {
        "wallaby.group.ristretto255"
    }

    fn generator(&self) -> RistrettoPoint {
        RISTRETTO_BASEPOINT_POINT
    }

    fn add(&self, a: &RistrettoPoint, b: &RistrettoPoint) -> RistrettoPoint {
        a + b
    }

    fn mul(&self, k: &Scalar) -> RistrettoPoint {
        RistrettoPoint::mul_base(k)
    }

    fn scalar_add(&self, a: &Scalar, b: &Scalar) -> Scalar {
        a + b
    }

    fn scalar_sub(&self, a: &Scalar, b: &Scalar) -> Scalar {
        a - b
    }

    fn scalar_from_u64(&self, v: u64) -> Scalar {
        Scalar::from(v)
    }

    fn scalar_from_hash(&self, bytes: &[u8; 32]) -> Scalar {
        Scalar::from_bytes_mod_order(*bytes)
    }

    fn encode_point(&self, p: &RistrettoPoint) -> PointBytes {
        p.compress().to_bytes()
    }

    fn decode_point(&self, bytes: &PointBytes) -> Option<RistrettoPoint> {
        CompressedRistretto(*bytes).decompress()
    }

    fn encode_scalar(&self, s: &Scalar) -> ScalarBytes {
        s.to_bytes()
    }

    fn decode_scalar(&self, bytes: &ScalarBytes) -> Option<Scalar> {
        Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
    }
}

//! Additive group of integers modulo a small prime.
//!
//! Not a curve. Every element is a residue, the generator is 1, and
//! "scalar multiplication" is reduction — which makes every walk, every
//! merge, and every solve checkable by hand. Used for bring-up and for
//! the end-to-end tests; nothing in the coordination core can tell it
//! apart from a real curve.

use crate::group::{Group, PointBytes, ScalarBytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModGroup {
    modulus: u64,
}

impl ModGroup {
    /// `modulus` should be an odd prime; the group order equals it.
    pub fn new(modulus: u64) -> Self {
        assert!(modulus >= 3, "modulus too small to form a useful group");
        // keeps a + b and a + modulus inside u64
        assert!(modulus < 1 << 63, "modulus too large for u64 arithmetic");
        ModGroup { modulus }
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    fn encode_u64(v: u64) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&v.to_le_bytes());
        out
    }

    fn decode_u64(&self, bytes: &[u8; 32]) -> Option<u64> {
        if bytes[8..].iter().any(|&b| b != 0) {
            return None;
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[0..8]);
        let v = u64::from_le_bytes(word);
        (v < self.modulus).then_some(v)
    }
}

impl Group for ModGroup {
    type Point = u64;
    type Scalar = u64;

    fn name(&self) -> &'static str {
        "wallaby.group.modadd"
    }

    fn generator(&self) -> u64 {
        1
    }

    fn add(&self, a: &u64, b: &u64) -> u64 {
        (a + b) % self.modulus
    }

    fn mul(&self, k: &u64) -> u64 {
        // k·G with G = 1.
        k % self.modulus
    }

    fn scalar_add(&self, a: &u64, b: &u64) -> u64 {
        (a + b) % self.modulus
    }

    fn scalar_sub(&self, a: &u64, b: &u64) -> u64 {
        (a + self.modulus - b % self.modulus) % self.modulus
    }

    fn scalar_from_u64(&self, v: u64) -> u64 {
        v % self.modulus
    }

    fn scalar_from_hash(&self, bytes: &[u8; 32]) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[0..8]);
        u64::from_le_bytes(word) % self.modulus
    }

    fn encode_point(&self, p: &u64) -> PointBytes {
        Self::encode_u64(*p)
    }

    fn decode_point(&self, bytes: &PointBytes) -> Option<u64> {
        self.decode_u64(bytes)
    }

    fn encode_scalar(&self, s: &u64) -> ScalarBytes {
        Self::encode_u64(*s)
    }

    fn decode_scalar(&self, bytes: &ScalarBytes) -> Option<u64> {
        self.decode_u64(bytes)
    }

    fn params_digest(&self) -> [u8; 32] {
        // The modulus is a parameter: mod-11 and mod-101 searches must
        // never merge.
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.name().as_bytes());
        hasher.update(&self.modulus.to_le_bytes());
        *hasher.finalize().as_bytes()
    }
}

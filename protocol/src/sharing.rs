//! Two-out-of-two additive secret sharing over the integers modulo `p`.
//!
//! A secret `s` is split into `(a, b)` where `a` is drawn uniformly from
//! `[0, p)` and `b = s - a mod p`. Either share on its own is uniformly
//! distributed and says nothing about `s`; the two together sum back to it.
//! Since addition mod `p` commutes with sharing, collectors can add shares of
//! many ballots and only ever reconstruct the sum.

use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::SharingError;

/// A modulus known to exceed the largest aggregate it will ever hold,
/// so reconstructed sums are unambiguous.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u64", try_from = "u64")]
pub struct Modulus(u64);

impl Modulus {
    /// Validate `p` against the largest value an aggregate may reach
    /// (for tallies, the total number of voters).
    pub fn new(p: u64, max_aggregate: u64) -> Result<Self, SharingError> {
        if p < 2 || p <= max_aggregate {
            return Err(SharingError::InvalidModulus {
                modulus: p,
                max_aggregate,
            });
        }
        Ok(Self(p))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Is `value` a canonical residue, i.e. in `[0, p)`?
    pub fn contains(self, value: u64) -> bool {
        value < self.0
    }

    pub fn add(self, a: u64, b: u64) -> u64 {
        ((u128::from(a) + u128::from(b)) % u128::from(self.0)) as u64
    }

    pub fn sub(self, a: u64, b: u64) -> u64 {
        let p = u128::from(self.0);
        ((u128::from(a) % p + p - u128::from(b) % p) % p) as u64
    }

    /// Add `other` into `acc` component-wise. Lengths must already agree.
    pub(crate) fn add_assign_vector(self, acc: &mut [u64], other: &[u64]) {
        for (a, b) in acc.iter_mut().zip(other) {
            *a = self.add(*a, *b);
        }
    }
}

impl From<Modulus> for u64 {
    fn from(modulus: Modulus) -> Self {
        modulus.0
    }
}

/// Deserialized moduli only guarantee `p >= 2`; the election config
/// re-validates against its electorate.
impl TryFrom<u64> for Modulus {
    type Error = SharingError;

    fn try_from(p: u64) -> Result<Self, Self::Error> {
        Self::new(p, 1)
    }
}

/// Split `secret` into two shares.
pub fn split<R>(secret: u64, modulus: Modulus, rng: &mut R) -> Result<(u64, u64), SharingError>
where
    R: RngCore + CryptoRng,
{
    if !modulus.contains(secret) {
        return Err(SharingError::SecretOutOfRange {
            secret,
            modulus: modulus.get(),
        });
    }
    let first = rng.gen_range(0..modulus.get());
    let second = modulus.sub(secret, first);
    Ok((first, second))
}

/// Combine two shares back into the value they hide.
pub fn reconstruct(first: u64, second: u64, modulus: Modulus) -> u64 {
    modulus.add(first, second)
}

/// Split every component independently, with fresh randomness for each.
pub fn split_vector<R>(
    secrets: &[u64],
    modulus: Modulus,
    rng: &mut R,
) -> Result<(Vec<u64>, Vec<u64>), SharingError>
where
    R: RngCore + CryptoRng,
{
    let mut first = Vec::with_capacity(secrets.len());
    let mut second = Vec::with_capacity(secrets.len());
    for secret in secrets {
        let (a, b) = split(*secret, modulus, rng)?;
        first.push(a);
        second.push(b);
    }
    Ok((first, second))
}

pub fn reconstruct_vector(
    first: &[u64],
    second: &[u64],
    modulus: Modulus,
) -> Result<Vec<u64>, SharingError> {
    if first.len() != second.len() {
        return Err(SharingError::LengthMismatch {
            left: first.len(),
            right: second.len(),
        });
    }
    Ok(first
        .iter()
        .zip(second)
        .map(|(a, b)| reconstruct(*a, *b, modulus))
        .collect())
}

//! Location anonymization.
//!
//! Each voter's location code is shared between the collectors exactly like a
//! ballot component, so the collectors' aggregates hold shares of the sum of
//! all locations. The sum is only ever reconstructed inside
//! [`ReconstructedLocation`], which cannot be printed or serialized and is
//! consumed by evaluating an [`EligibilityPredicate`]. Only the resulting
//! boolean survives.

use std::fmt::{Debug, Formatter};

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{config::ElectionConfig, error::BallotError, sharing::split};

/// Share a voter's location code between the collectors.
pub fn split_location<R>(
    location: u64,
    config: &ElectionConfig,
    rng: &mut R,
) -> Result<[u64; 2], BallotError>
where
    R: RngCore + CryptoRng,
{
    if location >= config.location_codes() {
        return Err(BallotError::LocationOutOfRange {
            location,
            codes: config.location_codes(),
        });
    }
    let (first, second) = split(location, config.modulus(), rng)?;
    Ok([first, second])
}

/// A decision over the reconstructed location sum of all counted voters.
pub trait EligibilityPredicate: Send + Sync {
    /// Human-readable description, recorded next to the verdict.
    fn describe(&self) -> String {
        "custom predicate".to_string()
    }

    fn is_eligible(&self, location_sum: u64, voter_count: u64) -> bool;
}

impl<F> EligibilityPredicate for F
where
    F: Fn(u64, u64) -> bool + Send + Sync,
{
    fn is_eligible(&self, location_sum: u64, voter_count: u64) -> bool {
        self(location_sum, voter_count)
    }
}

/// Predicates that can be selected from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateSpec {
    /// Every election is eligible.
    AcceptAll,
    /// The location sum lies in `[min, max]`.
    SumInRange { min: u64, max: u64 },
    /// The location sum equals `region * voters`. With `region` the highest
    /// location code, this holds exactly when every counted voter reported it.
    AllInRegion { region: u64 },
}

impl Default for PredicateSpec {
    fn default() -> Self {
        Self::AcceptAll
    }
}

impl EligibilityPredicate for PredicateSpec {
    fn describe(&self) -> String {
        match self {
            Self::AcceptAll => "accept all".to_string(),
            Self::SumInRange { min, max } => format!("location sum in [{min}, {max}]"),
            Self::AllInRegion { region } => format!("all voters in region {region}"),
        }
    }

    fn is_eligible(&self, location_sum: u64, voter_count: u64) -> bool {
        match self {
            Self::AcceptAll => true,
            Self::SumInRange { min, max } => (*min..=*max).contains(&location_sum),
            Self::AllInRegion { region } => {
                region.checked_mul(voter_count) == Some(location_sum)
            }
        }
    }
}

/// The outcome of the location check; the only thing retained from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationVerdict {
    pub predicate: String,
    pub eligible: bool,
}

/// The reconstructed location sum. Deliberately opaque: the value can only be
/// fed to a predicate, which consumes it.
pub struct ReconstructedLocation {
    sum: u64,
    voter_count: u64,
}

impl ReconstructedLocation {
    pub(crate) fn new(sum: u64, voter_count: u64) -> Self {
        Self { sum, voter_count }
    }

    pub fn evaluate(self, predicate: &dyn EligibilityPredicate) -> LocationVerdict {
        LocationVerdict {
            predicate: predicate.describe(),
            eligible: predicate.is_eligible(self.sum, self.voter_count),
        }
    }
}

impl Debug for ReconstructedLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconstructedLocation")
            .field("voter_count", &self.voter_count)
            .finish_non_exhaustive()
    }
}

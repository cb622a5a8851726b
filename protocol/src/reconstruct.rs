use std::collections::BTreeMap;

use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    aggregate::Snapshot,
    config::ElectionConfig,
    error::MismatchError,
    location::ReconstructedLocation,
    sharing::{reconstruct, reconstruct_vector},
    CandidateId,
};

/// The published result of an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalTally {
    pub per_candidate: BTreeMap<CandidateId, u64>,
    pub total_voters: u64,
}

impl FinalTally {
    /// SHA-256 over the canonical JSON encoding, hex encoded. Collectors
    /// compare digests rather than revealing unverified tallies to each other.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        HEXLOWER.encode(&Sha256::digest(canonical))
    }
}

/// The terminal state of a collector's aggregate: the combined tally,
/// the snapshot this collector contributed, and the still-unevaluated
/// location sum.
#[derive(Debug)]
pub struct Reconciled {
    own: Snapshot,
    tally: FinalTally,
    location: Option<ReconstructedLocation>,
}

impl Reconciled {
    pub fn tally(&self) -> &FinalTally {
        &self.tally
    }

    pub fn own_snapshot(&self) -> &Snapshot {
        &self.own
    }

    /// Hand out the reconstructed location sum. Only the first call gets it.
    pub fn take_location(&mut self) -> Option<ReconstructedLocation> {
        self.location.take()
    }
}

/// Combine both collectors' snapshots, checking that the result is a tally
/// that one-hot ballots could have produced.
pub(crate) fn reconstruct_tally(
    config: &ElectionConfig,
    own: Snapshot,
    peer: &Snapshot,
) -> Result<Reconciled, MismatchError> {
    if own.voter_count != peer.voter_count {
        return Err(MismatchError::VoterCount {
            own: own.voter_count,
            peer: peer.voter_count,
        });
    }
    let modulus = config.modulus();
    let counts = reconstruct_vector(&own.partial_tally, &peer.partial_tally, modulus).map_err(
        |_| MismatchError::TallyLength {
            own: own.partial_tally.len(),
            peer: peer.partial_tally.len(),
        },
    )?;
    if counts.len() != config.candidates().len() {
        return Err(MismatchError::TallyLength {
            own: counts.len(),
            peer: config.candidates().len(),
        });
    }

    let voters = own.voter_count;
    let mut per_candidate = BTreeMap::new();
    for (candidate, count) in config.candidates().iter().zip(counts.iter()) {
        if *count > voters {
            return Err(MismatchError::CountOutOfRange {
                candidate: candidate.clone(),
                count: *count,
                voters,
            });
        }
        per_candidate.insert(candidate.clone(), *count);
    }
    let sum: u64 = counts.iter().sum();
    if sum != voters {
        return Err(MismatchError::CountSum { sum, voters });
    }

    let location_sum = reconstruct(
        own.partial_location_sum,
        peer.partial_location_sum,
        modulus,
    );
    Ok(Reconciled {
        own,
        tally: FinalTally {
            per_candidate,
            total_voters: voters,
        },
        location: Some(ReconstructedLocation::new(location_sum, voters)),
    })
}

/// Check the peer's tally digest against ours.
pub fn cross_check(own: &FinalTally, peer_digest: &str) -> Result<(), MismatchError> {
    let own_digest = own.digest();
    if own_digest == peer_digest {
        Ok(())
    } else {
        Err(MismatchError::TallyDigest {
            own: own_digest,
            peer: peer_digest.to_string(),
        })
    }
}

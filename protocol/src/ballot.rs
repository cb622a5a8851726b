use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    config::{CollectorId, ElectionConfig},
    error::BallotError,
    location,
    sharing::split_vector,
    CandidateId, VoterId,
};

/// A voter's plaintext choice. Never leaves the voter's machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub voter_id: VoterId,
    /// Candidate id to mark. Candidates not present count as 0.
    pub marks: BTreeMap<CandidateId, u64>,
}

impl Ballot {
    /// A ballot with a single candidate marked.
    pub fn for_candidate(voter_id: impl Into<VoterId>, candidate: impl Into<CandidateId>) -> Self {
        Self {
            voter_id: voter_id.into(),
            marks: BTreeMap::from([(candidate.into(), 1)]),
        }
    }

    /// Check the ballot is one-hot over the election's candidates, and
    /// expand it into a vote vector in candidate order.
    pub fn vote_vector(&self, config: &ElectionConfig) -> Result<Vec<u64>, BallotError> {
        let mut vector = vec![0; config.candidates().len()];
        for (candidate, mark) in self.marks.iter() {
            let index = config
                .candidate_index(candidate)
                .ok_or_else(|| BallotError::UnknownCandidate(candidate.clone()))?;
            if *mark > 1 {
                return Err(BallotError::InvalidMark {
                    candidate: candidate.clone(),
                    mark: *mark,
                });
            }
            vector[index] = *mark;
        }
        match vector.iter().sum::<u64>() {
            0 => Err(BallotError::NoSelection),
            1 => Ok(vector),
            n => Err(BallotError::MultipleSelections(n as usize)),
        }
    }
}

/// The share of one ballot destined for a single collector.
/// This is the BallotShare message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotShare {
    pub voter_id: VoterId,
    pub share_vector: Vec<u64>,
    pub location_share: u64,
}

/// Both halves of a shared ballot and location. Transient: split into
/// two [`BallotShare`]s for transmission and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSet {
    voter_id: VoterId,
    ballot: [Vec<u64>; 2],
    location: [u64; 2],
}

impl ShareSet {
    pub fn voter_id(&self) -> &str {
        &self.voter_id
    }

    pub fn share_for(&self, collector: CollectorId) -> BallotShare {
        let i = collector.index();
        BallotShare {
            voter_id: self.voter_id.clone(),
            share_vector: self.ballot[i].clone(),
            location_share: self.location[i],
        }
    }

    /// Consume the set, yielding the messages for collectors A and B.
    pub fn into_shares(self) -> [BallotShare; 2] {
        let [ballot_a, ballot_b] = self.ballot;
        let [location_a, location_b] = self.location;
        [
            BallotShare {
                voter_id: self.voter_id.clone(),
                share_vector: ballot_a,
                location_share: location_a,
            },
            BallotShare {
                voter_id: self.voter_id,
                share_vector: ballot_b,
                location_share: location_b,
            },
        ]
    }
}

/// Validate a ballot and share it, together with the voter's location,
/// between the two collectors.
pub fn generate_shares<R>(
    ballot: &Ballot,
    location: u64,
    config: &ElectionConfig,
    rng: &mut R,
) -> Result<ShareSet, BallotError>
where
    R: RngCore + CryptoRng,
{
    let vector = ballot.vote_vector(config)?;
    let location = location::split_location(location, config, rng)?;
    let (first, second) = split_vector(&vector, config.modulus(), rng)?;

    Ok(ShareSet {
        voter_id: ballot.voter_id.clone(),
        ballot: [first, second],
        location,
    })
}

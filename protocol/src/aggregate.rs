//! Per-collector running aggregate.
//!
//! The lifecycle is encoded in the type: an [`Aggregator<Open>`] accepts
//! shares, closing it yields an [`Aggregator<Closed>`] whose sums are frozen,
//! and exchanging with the peer consumes that into a [`Reconciled`] outcome.
//! There is no way back, and no way to submit to a closed aggregate or
//! exchange an open one.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    ballot::BallotShare,
    config::ElectionConfig,
    error::{MismatchError, ShareError, SubmissionError},
    reconstruct::{reconstruct_tally, Reconciled},
    VoterId,
};

/// Lifecycle tag, as reported to operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Open,
    Closed,
    Reconciled,
}

/// Trait for the aggregation stage, restricting which operations exist.
pub trait Stage: Copy {
    const LIFECYCLE: Lifecycle;

    fn lifecycle(&self) -> Lifecycle {
        Self::LIFECYCLE
    }
}

/// Marker type for an aggregate that is accepting shares.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Open;

impl Stage for Open {
    const LIFECYCLE: Lifecycle = Lifecycle::Open;
}

/// Marker type for a frozen aggregate awaiting the peer exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Closed;

impl Stage for Closed {
    const LIFECYCLE: Lifecycle = Lifecycle::Closed;
}

/// One collector's partial sums, as frozen at close and sent to the peer.
/// This is the PeerExchange message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub partial_tally: Vec<u64>,
    pub partial_location_sum: u64,
    pub voter_count: u64,
}

/// A collector's running sums of ballot and location shares.
#[derive(Debug, Clone)]
pub struct Aggregator<S: Stage> {
    config: Arc<ElectionConfig>,
    running_tally: Vec<u64>,
    running_location_sum: u64,
    seen_voters: HashSet<VoterId>,
    stage: S,
}

impl<S: Stage> Aggregator<S> {
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.stage.lifecycle()
    }

    pub fn running_tally(&self) -> &[u64] {
        &self.running_tally
    }

    pub fn voter_count(&self) -> u64 {
        self.seen_voters.len() as u64
    }

    pub fn has_counted(&self, voter: &str) -> bool {
        self.seen_voters.contains(voter)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            partial_tally: self.running_tally.clone(),
            partial_location_sum: self.running_location_sum,
            voter_count: self.voter_count(),
        }
    }
}

impl Aggregator<Open> {
    /// Start an empty aggregate for the given election.
    pub fn new(config: Arc<ElectionConfig>) -> Self {
        let candidates = config.candidates().len();
        Self {
            config,
            running_tally: vec![0; candidates],
            running_location_sum: 0,
            seen_voters: HashSet::new(),
            stage: Open,
        }
    }

    /// Absorb one voter's share. Every check happens before the first write,
    /// so a refused share leaves the aggregate exactly as it was.
    pub fn submit_share(&mut self, share: &BallotShare) -> Result<(), SubmissionError> {
        self.check_share(share)?;
        if !self.config.is_eligible(&share.voter_id) {
            return Err(SubmissionError::UnknownVoter(share.voter_id.clone()));
        }
        if self.seen_voters.contains(&share.voter_id) {
            return Err(SubmissionError::DuplicateVoter(share.voter_id.clone()));
        }

        let modulus = self.config.modulus();
        modulus.add_assign_vector(&mut self.running_tally, &share.share_vector);
        self.running_location_sum = modulus.add(self.running_location_sum, share.location_share);
        self.seen_voters.insert(share.voter_id.clone());
        Ok(())
    }

    fn check_share(&self, share: &BallotShare) -> Result<(), ShareError> {
        let modulus = self.config.modulus();
        if share.share_vector.len() != self.running_tally.len() {
            return Err(ShareError::WrongLength {
                expected: self.running_tally.len(),
                actual: share.share_vector.len(),
            });
        }
        if let Some((index, value)) = share
            .share_vector
            .iter()
            .enumerate()
            .find(|(_, value)| !modulus.contains(**value))
        {
            return Err(ShareError::ComponentOutOfRange {
                index,
                value: *value,
                modulus: modulus.get(),
            });
        }
        if !modulus.contains(share.location_share) {
            return Err(ShareError::LocationOutOfRange {
                value: share.location_share,
                modulus: modulus.get(),
            });
        }
        Ok(())
    }

    /// Stop accepting shares, returning the frozen aggregate and its snapshot.
    pub fn close(self) -> (Aggregator<Closed>, Snapshot) {
        let closed = Aggregator {
            config: self.config,
            running_tally: self.running_tally,
            running_location_sum: self.running_location_sum,
            seen_voters: self.seen_voters,
            stage: Closed,
        };
        let snapshot = closed.snapshot();
        (closed, snapshot)
    }
}

impl Aggregator<Closed> {
    /// The frozen sums, as sent to the peer.
    pub fn own_snapshot(&self) -> Snapshot {
        self.snapshot()
    }

    /// Combine with the peer's snapshot into the final tally.
    /// Any inconsistency between the two halves is fatal for the election.
    pub fn exchange_with_peer(self, peer: &Snapshot) -> Result<Reconciled, MismatchError> {
        let own = self.snapshot();
        reconstruct_tally(&self.config, own, peer)
    }
}

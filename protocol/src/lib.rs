//! Additive secret sharing of ballots between two non-colluding collectors.
//!
//! A voter splits a one-hot ballot and a location code into two shares with
//! [`generate_shares`]. Each collector adds the shares it receives into an
//! [`Aggregator`]; once both close, each combines its own [`Snapshot`] with
//! the peer's into the same [`FinalTally`]. Neither collector ever holds
//! enough to recover an individual ballot.
//!
//! Privacy caveat: reconstruction reveals the tally, and a tally over a single
//! voter is that voter's ballot. No minimum cohort size is enforced here.

pub mod aggregate;
pub mod ballot;
pub mod config;
pub mod error;
pub mod location;
pub mod reconstruct;
pub mod sharing;

pub type CandidateId = String;
pub type VoterId = String;

pub use aggregate::{Aggregator, Closed, Lifecycle, Open, Snapshot, Stage};
pub use ballot::{generate_shares, Ballot, BallotShare, ShareSet};
pub use config::{CollectorId, ElectionConfig};
pub use error::{
    BallotError, ConfigError, MismatchError, ShareError, SharingError, SubmissionError,
    TransitionError,
};
pub use location::{EligibilityPredicate, LocationVerdict, PredicateSpec, ReconstructedLocation};
pub use reconstruct::{cross_check, FinalTally, Reconciled};
pub use sharing::{reconstruct, reconstruct_vector, split, split_vector, Modulus};

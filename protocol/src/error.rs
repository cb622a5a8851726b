use thiserror::Error;

use crate::{CandidateId, VoterId};

/// Malformed or inconsistent election parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("the election has no candidates")]
    NoCandidates,
    #[error("candidate '{0}' is listed more than once")]
    DuplicateCandidate(CandidateId),
    #[error("the voter roster is empty")]
    EmptyRoster,
    #[error("both collectors are configured with the same endpoint '{0}'")]
    SameCollectors(String),
    #[error("at least one location code is required")]
    NoLocationCodes,
    #[error(transparent)]
    Modulus(#[from] SharingError),
}

/// Errors from the secret sharing engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SharingError {
    #[error("modulus {modulus} does not exceed the largest possible aggregate {max_aggregate}")]
    InvalidModulus { modulus: u64, max_aggregate: u64 },
    #[error("secret {secret} is outside [0, {modulus})")]
    SecretOutOfRange { secret: u64, modulus: u64 },
    #[error("share vectors differ in length ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
}

/// A ballot that cannot be shared. Rejected before anything leaves the voter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    #[error("no candidate is marked")]
    NoSelection,
    #[error("{0} candidates are marked, exactly one is allowed")]
    MultipleSelections(usize),
    #[error("unknown candidate '{0}'")]
    UnknownCandidate(CandidateId),
    #[error("candidate '{candidate}' is marked with {mark}, only 0 or 1 is allowed")]
    InvalidMark { candidate: CandidateId, mark: u64 },
    #[error("location {location} is outside [0, {codes})")]
    LocationOutOfRange { location: u64, codes: u64 },
    #[error(transparent)]
    Sharing(#[from] SharingError),
}

/// A ballot share that does not fit the election.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    #[error("share vector has {actual} components, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("share component {index} is {value}, outside [0, {modulus})")]
    ComponentOutOfRange { index: usize, value: u64, modulus: u64 },
    #[error("location share {value} is outside [0, {modulus})")]
    LocationOutOfRange { value: u64, modulus: u64 },
}

/// Reasons a submission to an open aggregate is refused.
/// A refused submission leaves the aggregate untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Share(#[from] ShareError),
    #[error("voter '{0}' is not on the roster")]
    UnknownVoter(VoterId),
    #[error("voter '{0}' has already been counted")]
    DuplicateVoter(VoterId),
}

/// Commands that arrived in the wrong lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("collection is not open")]
    NotOpen,
    #[error("collection has not been closed")]
    NotClosed,
    #[error("collection is already closed")]
    AlreadyClosed,
    #[error("the peer exchange has already completed")]
    AlreadyReconciled,
}

/// The two collectors disagree. Always fatal: nothing may be published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MismatchError {
    #[error("voter counts differ (own {own}, peer {peer})")]
    VoterCount { own: u64, peer: u64 },
    #[error("tally lengths differ (own {own}, peer {peer})")]
    TallyLength { own: usize, peer: usize },
    #[error("candidate '{candidate}' reconstructed to {count}, above the {voters} voters counted")]
    CountOutOfRange {
        candidate: CandidateId,
        count: u64,
        voters: u64,
    },
    #[error("reconstructed counts sum to {sum}, but {voters} voters were counted")]
    CountSum { sum: u64, voters: u64 },
    #[error("peer is running a different election (config digest {peer})")]
    ConfigDigest { peer: String },
    #[error("peer sent a conflicting {0}")]
    Conflicting(&'static str),
    #[error("tally digests differ (own {own}, peer {peer})")]
    TallyDigest { own: String, peer: String },
    #[error("peer halted: {0}")]
    PeerHalted(String),
}

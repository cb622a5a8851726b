//! Messages exchanged with voters, operators and the peer collector, beyond
//! the protocol types themselves.

use serde::{Deserialize, Serialize};
use split_tally_protocol::{CollectorId, FinalTally, Lifecycle, LocationVerdict, VoterId};

/// Acknowledgement that a collector has counted a voter's share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub collector: CollectorId,
    pub voter_id: VoterId,
}

/// Reply to the close command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseReceipt {
    pub collector: CollectorId,
    pub voter_count: u64,
}

/// Body of a peer confirmation: the digest of the sender's tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyConfirmation {
    pub tally_digest: String,
}

/// A cross-checked election result, as served once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedResult {
    pub tally: FinalTally,
    pub eligibility: LocationVerdict,
}

/// What an operator can see of a running collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub collector: CollectorId,
    pub lifecycle: Lifecycle,
    pub voters_counted: u64,
    pub published: bool,
    pub failure: Option<String>,
}

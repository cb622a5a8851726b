use std::collections::{BTreeSet, HashSet};
use std::fmt::{Display, Formatter};

use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::ConfigError, sharing::Modulus, CandidateId, VoterId};

/// One of the two collectors. Also names which half of every share pair
/// that collector receives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorId {
    A,
    B,
}

impl CollectorId {
    pub fn peer(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub fn both() -> [Self; 2] {
        [Self::A, Self::B]
    }
}

impl Display for CollectorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "collector-a"),
            Self::B => write!(f, "collector-b"),
        }
    }
}

/// The parameters of one election, as distributed by the election
/// administrator to voters and collectors. Always valid: both construction
/// and deserialization go through [`ElectionConfig::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawElectionConfig", rename_all = "camelCase")]
pub struct ElectionConfig {
    candidates: Vec<CandidateId>,
    voters: BTreeSet<VoterId>,
    modulus: Modulus,
    collectors: [String; 2],
    location_codes: u64,
}

/// Unchecked wire form of [`ElectionConfig`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElectionConfig {
    candidates: Vec<CandidateId>,
    voters: BTreeSet<VoterId>,
    modulus: u64,
    collectors: [String; 2],
    #[serde(default = "default_location_codes")]
    location_codes: u64,
}

fn default_location_codes() -> u64 {
    1
}

impl TryFrom<RawElectionConfig> for ElectionConfig {
    type Error = ConfigError;

    fn try_from(raw: RawElectionConfig) -> Result<Self, Self::Error> {
        Self::new(
            raw.candidates,
            raw.voters,
            raw.modulus,
            raw.collectors,
            raw.location_codes,
        )
    }
}

impl ElectionConfig {
    pub fn new(
        candidates: Vec<CandidateId>,
        voters: BTreeSet<VoterId>,
        modulus: u64,
        collectors: [String; 2],
        location_codes: u64,
    ) -> Result<Self, ConfigError> {
        if candidates.is_empty() {
            return Err(ConfigError::NoCandidates);
        }
        let mut seen = HashSet::new();
        for candidate in candidates.iter() {
            if !seen.insert(candidate) {
                return Err(ConfigError::DuplicateCandidate(candidate.clone()));
            }
        }
        if voters.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        if collectors[0] == collectors[1] {
            return Err(ConfigError::SameCollectors(collectors[0].clone()));
        }
        if location_codes == 0 {
            return Err(ConfigError::NoLocationCodes);
        }

        // Both the per-candidate tallies and the location sum must fit
        // below the modulus, or reconstruction wraps.
        let voter_count = voters.len() as u64;
        let max_location_sum = voter_count.saturating_mul(location_codes - 1);
        let modulus = Modulus::new(modulus, voter_count.max(max_location_sum))?;

        Ok(Self {
            candidates,
            voters,
            modulus,
            collectors,
            location_codes,
        })
    }

    /// Candidate ids in ballot vector order.
    pub fn candidates(&self) -> &[CandidateId] {
        &self.candidates
    }

    pub fn candidate_index(&self, candidate: &str) -> Option<usize> {
        self.candidates.iter().position(|c| c == candidate)
    }

    pub fn voters(&self) -> &BTreeSet<VoterId> {
        &self.voters
    }

    pub fn is_eligible(&self, voter: &str) -> bool {
        self.voters.contains(voter)
    }

    pub fn total_voters(&self) -> u64 {
        self.voters.len() as u64
    }

    pub fn modulus(&self) -> Modulus {
        self.modulus
    }

    pub fn collector_endpoint(&self, collector: CollectorId) -> &str {
        &self.collectors[collector.index()]
    }

    pub fn location_codes(&self) -> u64 {
        self.location_codes
    }

    /// SHA-256 over the canonical JSON encoding, hex encoded.
    /// Two parties hold the same election iff their digests agree.
    pub fn digest(&self) -> String {
        // Serialising plain vectors, sets and integers cannot fail.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        HEXLOWER.encode(&Sha256::digest(canonical))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Three voters, two candidates, p = 1009.
    pub(crate) fn example_config() -> ElectionConfig {
        config_with_voters(3)
    }

    pub(crate) fn config_with_voters(count: usize) -> ElectionConfig {
        ElectionConfig::new(
            vec!["A".to_string(), "B".to_string()],
            (1..=count).map(|i| format!("voter-{i}")).collect(),
            1009,
            [
                "http://127.0.0.1:8001".to_string(),
                "http://127.0.0.1:8002".to_string(),
            ],
            4,
        )
        .unwrap()
    }

    #[test]
    fn validation() {
        let collectors = || ["a".to_string(), "b".to_string()];
        let voters: BTreeSet<_> = ["v1".to_string(), "v2".to_string()].into();

        assert_eq!(
            ElectionConfig::new(vec![], voters.clone(), 11, collectors(), 1),
            Err(ConfigError::NoCandidates)
        );
        assert_eq!(
            ElectionConfig::new(
                vec!["X".into(), "X".into()],
                voters.clone(),
                11,
                collectors(),
                1
            ),
            Err(ConfigError::DuplicateCandidate("X".into()))
        );
        assert_eq!(
            ElectionConfig::new(vec!["X".into()], BTreeSet::new(), 11, collectors(), 1),
            Err(ConfigError::EmptyRoster)
        );
        assert_eq!(
            ElectionConfig::new(
                vec!["X".into()],
                voters.clone(),
                11,
                ["a".into(), "a".into()],
                1
            ),
            Err(ConfigError::SameCollectors("a".into()))
        );
        assert_eq!(
            ElectionConfig::new(vec!["X".into()], voters.clone(), 11, collectors(), 0),
            Err(ConfigError::NoLocationCodes)
        );
        // Two voters need p > 2.
        assert!(matches!(
            ElectionConfig::new(vec!["X".into()], voters.clone(), 2, collectors(), 1),
            Err(ConfigError::Modulus(_))
        ));
        // Two voters in up to 10 locations can sum to 18.
        assert!(ElectionConfig::new(vec!["X".into()], voters.clone(), 18, collectors(), 10).is_err());
        assert!(ElectionConfig::new(vec!["X".into()], voters, 19, collectors(), 10).is_ok());
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{
            "candidates": ["A", "B"],
            "voters": ["v1", "v2", "v3"],
            "modulus": 3,
            "collectors": ["http://a", "http://b"]
        }"#;
        assert!(serde_json::from_str::<ElectionConfig>(json).is_err());

        let json = json.replace("\"modulus\": 3", "\"modulus\": 1009");
        let config: ElectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.location_codes(), 1);
        assert_eq!(config.total_voters(), 3);
        assert_eq!(config.candidate_index("B"), Some(1));
        assert_eq!(config.collector_endpoint(CollectorId::B), "http://b");
    }

    #[test]
    fn digest_round_trips_through_json() {
        let config = example_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ElectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.digest(), parsed.digest());
        assert_ne!(config.digest(), config_with_voters(4).digest());
    }
}

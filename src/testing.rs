//! Fixtures shared by the unit tests.

use std::sync::Arc;

use rocket::tokio::time::Duration;
use split_tally_protocol::{CollectorId, ElectionConfig, PredicateSpec, Snapshot};

use crate::api::refusal_for_peer;
use crate::collector::{CollectorHandle, CollectorSettings};
use crate::error::{Error, Result};
use crate::peer::{PeerAuth, PeerLink};
use crate::retry::RetryPolicy;

pub const PEER_SECRET: &str = "test peer secret";

/// Capture log output from the collector and the protocol in tests.
pub fn init_logging() {
    log4rs_test_utils::test_logging::init_logging_once_for(
        ["split_tally", "split_tally_protocol"],
        None,
        None,
    );
}

/// Candidates A and B, voters `voter-1` to `voter-n`, p = 1009, four
/// location codes.
pub fn election_with_voters(voters: usize) -> ElectionConfig {
    ElectionConfig::new(
        vec!["A".to_string(), "B".to_string()],
        (1..=voters).map(|n| format!("voter-{n}")).collect(),
        1009,
        [
            "http://127.0.0.1:8001".to_string(),
            "http://127.0.0.1:8002".to_string(),
        ],
        4,
    )
    .unwrap()
}

pub fn election() -> ElectionConfig {
    election_with_voters(3)
}

pub fn settings(collector: CollectorId) -> CollectorSettings {
    CollectorSettings {
        collector,
        queue_depth: 16,
        submission_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(5),
            timeout: Duration::from_secs(1),
        },
        reconcile_timeout: Duration::from_secs(5),
        predicate: Arc::new(PredicateSpec::AcceptAll),
    }
}

/// Keys for signing as `collector` in the test election.
pub fn peer_auth(collector: CollectorId) -> PeerAuth {
    PeerAuth::new(collector, election().digest(), PEER_SECRET.as_bytes())
}

/// A peer running in the same process.
pub struct LocalPeer {
    target: CollectorHandle,
}

impl LocalPeer {
    pub fn new(target: CollectorHandle) -> Self {
        Self { target }
    }
}

#[rocket::async_trait]
impl PeerLink for LocalPeer {
    async fn send_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.target
            .offer_snapshot(snapshot.clone())
            .await
            .map_err(refusal_for_peer)
    }

    async fn send_confirmation(&self, tally_digest: &str) -> Result<()> {
        self.target
            .offer_confirmation(tally_digest.to_string())
            .await
            .map_err(refusal_for_peer)
    }
}

/// A peer that takes every message and does nothing with it.
pub struct AcceptingPeer;

#[rocket::async_trait]
impl PeerLink for AcceptingPeer {
    async fn send_snapshot(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }

    async fn send_confirmation(&self, _tally_digest: &str) -> Result<()> {
        Ok(())
    }
}

/// A peer that is never there.
pub struct UnreachablePeer;

#[rocket::async_trait]
impl PeerLink for UnreachablePeer {
    async fn send_snapshot(&self, _snapshot: &Snapshot) -> Result<()> {
        Err(Error::Network("connection refused".to_string()))
    }

    async fn send_confirmation(&self, _tally_digest: &str) -> Result<()> {
        Err(Error::Network("connection refused".to_string()))
    }
}

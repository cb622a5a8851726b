use rocket::{serde::json::Json, Route, State};
use serde::Serialize;
use split_tally_protocol::Snapshot;

use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::model::TallyConfirmation;
use crate::peer::{Envelope, PeerAuth};

pub fn routes() -> Vec<Route> {
    routes![receive_snapshot, receive_confirmation]
}

#[post("/peer/snapshot", data = "<envelope>", format = "json")]
async fn receive_snapshot(
    envelope: Json<Envelope<Snapshot>>,
    auth: &State<PeerAuth>,
    collector: &State<Collector>,
) -> Result<()> {
    let snapshot = open(envelope.into_inner(), auth, collector).await?;
    collector
        .handle()
        .offer_snapshot(snapshot)
        .await
        .map_err(refusal_for_peer)
}

#[post("/peer/confirm", data = "<envelope>", format = "json")]
async fn receive_confirmation(
    envelope: Json<Envelope<TallyConfirmation>>,
    auth: &State<PeerAuth>,
    collector: &State<Collector>,
) -> Result<()> {
    let confirmation = open(envelope.into_inner(), auth, collector).await?;
    collector
        .handle()
        .offer_confirmation(confirmation.tally_digest)
        .await
        .map_err(refusal_for_peer)
}

/// Authenticate a peer message. A peer running a different election is
/// fatal for this one.
async fn open<T: Serialize>(
    envelope: Envelope<T>,
    auth: &PeerAuth,
    collector: &Collector,
) -> Result<T> {
    match auth.open(envelope) {
        Err(Error::ProtocolMismatch(mismatch)) => {
            collector
                .handle()
                .halt(format!("protocol mismatch: {mismatch}"))
                .await;
            Err(mismatch.into())
        }
        other => other,
    }
}

/// A halted collector can no longer take part, which the peer must treat
/// as final rather than retry.
pub(crate) fn refusal_for_peer(err: Error) -> Error {
    match err {
        Error::Halted(reason) => {
            Error::ProtocolMismatch(split_tally_protocol::MismatchError::PeerHalted(reason))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };
    use split_tally_protocol::{generate_shares, Ballot, CollectorId, FinalTally, Lifecycle};

    use super::*;
    use crate::model::{PublishedResult, StatusView};
    use crate::testing::{election, peer_auth};

    async fn post<T: Serialize>(client: &Client, path: &str, envelope: &Envelope<T>) -> Status {
        client
            .post(path)
            .header(ContentType::JSON)
            .body(serde_json::to_string(envelope).unwrap())
            .dispatch()
            .await
            .status()
    }

    async fn status(client: &Client) -> StatusView {
        client
            .get("/status")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap()
    }

    /// Vote A, A, B: the shares for this collector go through the API, the
    /// peer's halves are summed here to play collector B.
    async fn vote_and_close(client: &Client) -> Snapshot {
        let config = election();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let modulus = config.modulus();
        let mut peer = Snapshot {
            partial_tally: vec![0, 0],
            partial_location_sum: 0,
            voter_count: 0,
        };
        for (voter, candidate) in [("voter-1", "A"), ("voter-2", "A"), ("voter-3", "B")] {
            let ballot = Ballot::for_candidate(voter, candidate);
            let [ours, theirs] = generate_shares(&ballot, 1, &config, &mut rng)
                .unwrap()
                .into_shares();
            let response = client
                .post("/shares")
                .header(ContentType::JSON)
                .body(serde_json::to_string(&ours).unwrap())
                .dispatch()
                .await;
            assert_eq!(Status::Ok, response.status());
            for (sum, share) in peer.partial_tally.iter_mut().zip(theirs.share_vector) {
                *sum = modulus.add(*sum, share);
            }
            peer.partial_location_sum =
                modulus.add(peer.partial_location_sum, theirs.location_share);
            peer.voter_count += 1;
        }
        assert_eq!(Status::Ok, client.post("/close").dispatch().await.status());
        peer
    }

    fn expected_tally() -> FinalTally {
        FinalTally {
            per_candidate: BTreeMap::from([("A".to_string(), 2), ("B".to_string(), 1)]),
            total_voters: 3,
        }
    }

    #[collector_test]
    async fn reconciles_and_publishes(client: Client) {
        let peer_snapshot = vote_and_close(&client).await;
        let from_b = peer_auth(CollectorId::B);

        let envelope = from_b.seal(peer_snapshot).unwrap();
        assert_eq!(Status::Ok, post(&client, "/peer/snapshot", &envelope).await);
        // Re-delivery is harmless.
        assert_eq!(Status::Ok, post(&client, "/peer/snapshot", &envelope).await);
        assert_eq!(Lifecycle::Reconciled, status(&client).await.lifecycle);
        assert_eq!(Status::NotFound, client.get("/tally").dispatch().await.status());

        let confirmation = from_b
            .seal(TallyConfirmation {
                tally_digest: expected_tally().digest(),
            })
            .unwrap();
        assert_eq!(Status::Ok, post(&client, "/peer/confirm", &confirmation).await);

        let response = client.get("/tally").dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let published: PublishedResult = response.into_json().await.unwrap();
        assert_eq!(published.tally, expected_tally());
        assert!(published.eligibility.eligible);
        assert!(status(&client).await.published);
    }

    #[collector_test]
    async fn diverging_tallies_halt(client: Client) {
        let peer_snapshot = vote_and_close(&client).await;
        let from_b = peer_auth(CollectorId::B);
        assert_eq!(
            Status::Ok,
            post(&client, "/peer/snapshot", &from_b.seal(peer_snapshot).unwrap()).await
        );

        let mut wrong = expected_tally();
        wrong.per_candidate.insert("A".to_string(), 1);
        wrong.per_candidate.insert("B".to_string(), 2);
        let confirmation = from_b
            .seal(TallyConfirmation {
                tally_digest: wrong.digest(),
            })
            .unwrap();
        assert_eq!(
            Status::PreconditionFailed,
            post(&client, "/peer/confirm", &confirmation).await
        );
        assert!(status(&client).await.failure.is_some());
        assert_eq!(
            Status::ServiceUnavailable,
            client.get("/tally").dispatch().await.status()
        );
    }

    #[collector_test]
    async fn corrupted_snapshot_is_a_mismatch(client: Client) {
        let mut peer_snapshot = vote_and_close(&client).await;
        peer_snapshot.partial_tally[1] = (peer_snapshot.partial_tally[1] + 5) % 1009;
        let envelope = peer_auth(CollectorId::B).seal(peer_snapshot).unwrap();

        assert_eq!(
            Status::PreconditionFailed,
            post(&client, "/peer/snapshot", &envelope).await
        );
        let status = status(&client).await;
        assert_eq!(status.lifecycle, Lifecycle::Closed);
        assert!(!status.published);
        assert!(status.failure.is_some());
    }

    #[collector_test]
    async fn forged_envelopes_are_unauthorized(client: Client) {
        let snapshot = Snapshot {
            partial_tally: vec![1, 2],
            partial_location_sum: 3,
            voter_count: 0,
        };

        let mut tampered = peer_auth(CollectorId::B).seal(snapshot.clone()).unwrap();
        tampered.payload.voter_count = 1;
        assert_eq!(
            Status::Unauthorized,
            post(&client, "/peer/snapshot", &tampered).await
        );

        let outsider = PeerAuth::new(CollectorId::B, election().digest(), b"wrong secret");
        let forged = outsider.seal(snapshot.clone()).unwrap();
        assert_eq!(Status::Unauthorized, post(&client, "/peer/snapshot", &forged).await);

        let from_self = peer_auth(CollectorId::A).seal(snapshot).unwrap();
        assert_eq!(Status::Unauthorized, post(&client, "/peer/snapshot", &from_self).await);

        // None of that disturbs the collector.
        assert_eq!(status(&client).await.failure, None);
    }

    #[collector_test]
    async fn other_elections_are_a_mismatch(client: Client) {
        let other = PeerAuth::new(
            CollectorId::B,
            "digest of another election".to_string(),
            crate::testing::PEER_SECRET.as_bytes(),
        );
        let envelope = other
            .seal(TallyConfirmation {
                tally_digest: "abc".to_string(),
            })
            .unwrap();
        assert_eq!(
            Status::PreconditionFailed,
            post(&client, "/peer/confirm", &envelope).await
        );
        assert!(status(&client).await.failure.is_some());
    }
}

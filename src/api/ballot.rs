use rocket::{serde::json::Json, Route, State};
use split_tally_protocol::BallotShare;

use crate::collector::Collector;
use crate::error::Result;
use crate::logging::RequestId;
use crate::model::Receipt;

pub fn routes() -> Vec<Route> {
    routes![submit_share]
}

#[post("/shares", data = "<share>", format = "json")]
async fn submit_share(
    id: &RequestId,
    share: Json<BallotShare>,
    collector: &State<Collector>,
) -> Result<Json<Receipt>> {
    let share = share.into_inner();
    let voter_id = share.voter_id.clone();
    collector.handle().submit_share(share).await?;
    debug!("req{id} counted a share from {voter_id}");

    Ok(Json(Receipt {
        collector: collector.handle().id(),
        voter_id,
    }))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };
    use split_tally_protocol::{generate_shares, Ballot, CollectorId};

    use super::*;
    use crate::error::{ErrorKind, ErrorReply};
    use crate::testing::election;

    fn share_for(voter: &str, candidate: &str) -> BallotShare {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        generate_shares(&Ballot::for_candidate(voter, candidate), 0, &election(), &mut rng)
            .unwrap()
            .share_for(CollectorId::A)
    }

    async fn submit(client: &Client, body: String) -> Status {
        client
            .post(uri!(submit_share))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await
            .status()
    }

    #[collector_test]
    async fn accepted_share_gets_receipt(client: Client) {
        let share = share_for("voter-1", "A");
        let response = client
            .post(uri!(submit_share))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&share).unwrap())
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        let receipt: Receipt = response.into_json().await.unwrap();
        assert_eq!(
            receipt,
            Receipt {
                collector: CollectorId::A,
                voter_id: "voter-1".to_string(),
            }
        );
    }

    #[collector_test]
    async fn duplicate_share_conflicts(client: Client) {
        let body = serde_json::to_string(&share_for("voter-1", "A")).unwrap();
        assert_eq!(Status::Ok, submit(&client, body.clone()).await);
        let response = client
            .post(uri!(submit_share))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
        let reply: ErrorReply = response.into_json().await.unwrap();
        assert_eq!(reply.kind, ErrorKind::DuplicateVoter);
    }

    #[collector_test]
    async fn late_shares_are_refused_as_closed(client: Client) {
        let response = client.post("/close").dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let body = serde_json::to_string(&share_for("voter-1", "A")).unwrap();
        let response = client
            .post(uri!(submit_share))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
        let reply: ErrorReply = response.into_json().await.unwrap();
        assert_eq!(reply.kind, ErrorKind::Transition);
    }

    #[collector_test]
    async fn strangers_are_forbidden(client: Client) {
        let body = serde_json::to_string(&share_for("mallory", "A")).unwrap();
        assert_eq!(Status::Forbidden, submit(&client, body).await);
    }

    #[collector_test]
    async fn malformed_shares_are_unprocessable(client: Client) {
        let mut share = share_for("voter-1", "A");
        share.share_vector.push(0);
        let body = serde_json::to_string(&share).unwrap();
        assert_eq!(Status::UnprocessableEntity, submit(&client, body).await);

        // The rejected share had no effect.
        let body = serde_json::to_string(&share_for("voter-1", "B")).unwrap();
        assert_eq!(Status::Ok, submit(&client, body).await);
    }
}

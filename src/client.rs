//! Client for a collector's voter and operator endpoints.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{de::DeserializeOwned, Serialize};
use split_tally_protocol::{BallotShare, CollectorId};

use crate::error::{Error, Result};
use crate::model::{CloseReceipt, PublishedResult, Receipt, StatusView};
use crate::retry::{with_retry, RetryPolicy};

pub struct CollectorClient {
    collector: CollectorId,
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl CollectorClient {
    pub fn new(collector: CollectorId, base_url: &str, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(retry.timeout).build()?;
        Ok(Self {
            collector,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn collector(&self) -> CollectorId {
        self.collector
    }

    /// Submit this collector's share of a ballot.
    ///
    /// If an attempt timed out after the collector had counted the share, a
    /// retry is refused as a duplicate; that refusal is the acknowledgement.
    /// Any other refusal, such as the collector having closed in between,
    /// means the share was not counted.
    pub async fn submit_share(&self, share: &BallotShare) -> Result<Receipt> {
        let attempts = AtomicU32::new(0);
        with_retry(self.retry, "share submission", || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.post("/shares", Some(share), "share submission").await {
                Err(Error::Duplicate(_)) if attempt > 1 => {
                    info!(
                        "{} had already counted {} on an earlier attempt",
                        self.collector, share.voter_id
                    );
                    Ok(Receipt {
                        collector: self.collector,
                        voter_id: share.voter_id.clone(),
                    })
                }
                other => other,
            }
        })
        .await
    }

    /// Tell the collector to stop accepting shares.
    pub async fn close(&self) -> Result<CloseReceipt> {
        with_retry(self.retry, "close", || {
            self.post::<(), _>("/close", None, "close")
        })
        .await
    }

    pub async fn status(&self) -> Result<StatusView> {
        with_retry(self.retry, "status", || self.get("/status", "status")).await
    }

    /// Fetch the published result.
    pub async fn published(&self) -> Result<PublishedResult> {
        with_retry(self.retry, "tally", || self.get("/tally", "tally")).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
        what: &str,
    ) -> Result<T> {
        let mut request = self.http.post(format!("{}{path}", self.base_url));
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::read(request.send().await?, what).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        Self::read(response, what).await
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        if !response.status().is_success() {
            return Err(Error::from_response(response, what).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::BadRequest(format!("unreadable {what} reply: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rocket::tokio::{self, time::Duration};
    use split_tally_protocol::{generate_shares, Ballot, Lifecycle};

    use super::*;
    use crate::collector::Collector;
    use crate::testing::election;

    #[rocket::async_test]
    async fn talks_to_a_running_collector() {
        let rocket = crate::test_rocket(CollectorId::A);
        let figment = rocket.figment().clone().merge(("port", 38217));
        let rocket = rocket.configure(figment).ignite().await.unwrap();
        let shutdown = rocket.shutdown();
        tokio::spawn(rocket.launch());

        let retry = RetryPolicy {
            attempts: 20,
            initial_backoff: Duration::from_millis(10),
            timeout: Duration::from_secs(2),
        };
        let client = CollectorClient::new(CollectorId::A, "http://127.0.0.1:38217/", retry).unwrap();

        let status = client.status().await.unwrap();
        assert_eq!(status.lifecycle, Lifecycle::Open);

        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let share = generate_shares(&Ballot::for_candidate("voter-2", "B"), 3, &election(), &mut rng)
            .unwrap()
            .share_for(CollectorId::A);
        let receipt = client.submit_share(&share).await.unwrap();
        assert_eq!(receipt.voter_id, "voter-2");
        assert!(matches!(
            client.submit_share(&share).await,
            Err(Error::Duplicate(_))
        ));

        assert!(matches!(client.published().await, Err(Error::NotFound(_))));
        assert_eq!(client.close().await.unwrap().voter_count, 1);
        assert!(matches!(client.close().await, Err(Error::Conflict(_))));

        shutdown.notify();
    }

    #[rocket::async_test]
    async fn closing_between_attempts_is_not_a_receipt() {
        let rocket = crate::test_rocket(CollectorId::A);
        let figment = rocket.figment().clone().merge(("port", 38218));
        let rocket = rocket.configure(figment).ignite().await.unwrap();
        let shutdown = rocket.shutdown();
        let collector = rocket.state::<Collector>().unwrap().clone();
        collector.close().await.unwrap();

        // Nothing listens yet, so the first attempt cannot connect.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            rocket.launch().await
        });

        let retry = RetryPolicy {
            attempts: 20,
            initial_backoff: Duration::from_millis(10),
            timeout: Duration::from_secs(2),
        };
        let client = CollectorClient::new(CollectorId::A, "http://127.0.0.1:38218", retry).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let share = generate_shares(&Ballot::for_candidate("voter-1", "A"), 0, &election(), &mut rng)
            .unwrap()
            .share_for(CollectorId::A);

        assert!(matches!(
            client.submit_share(&share).await,
            Err(Error::Conflict(_))
        ));
        let status = client.status().await.unwrap();
        assert_eq!(status.lifecycle, Lifecycle::Closed);
        assert_eq!(status.voters_counted, 0);

        shutdown.notify();
    }
}

//! Authenticated collector-to-collector messaging.
//!
//! Every peer message travels in an [`Envelope`] carrying the sender, the
//! digest of the election config the sender is running, and an HMAC-SHA256
//! over all three under the shared `peer_secret`.

use std::sync::Arc;

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rocket::serde::json::serde_json;
use rocket::tokio::time::Duration;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use split_tally_protocol::{CollectorId, MismatchError, Snapshot};

use crate::error::{Error, Result};
use crate::model::TallyConfirmation;

type HmacSha256 = Hmac<Sha256>;

/// A signed peer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub sender: CollectorId,
    pub config_digest: String,
    pub payload: T,
    pub signature: String,
}

/// Keys and identity for sealing outgoing and opening incoming envelopes.
#[derive(Clone)]
pub struct PeerAuth {
    own: CollectorId,
    config_digest: String,
    secret: Vec<u8>,
}

impl PeerAuth {
    pub fn new(own: CollectorId, config_digest: String, secret: &[u8]) -> Self {
        Self {
            own,
            config_digest,
            secret: secret.to_vec(),
        }
    }

    pub fn own(&self) -> CollectorId {
        self.own
    }

    /// Sign `payload` as coming from this collector.
    pub fn seal<T: Serialize>(&self, payload: T) -> Result<Envelope<T>> {
        let mac = self.mac(self.own, &self.config_digest, &payload)?;
        Ok(Envelope {
            sender: self.own,
            config_digest: self.config_digest.clone(),
            payload,
            signature: HEXLOWER.encode(&mac.finalize().into_bytes()),
        })
    }

    /// Check an envelope claims to come from our peer and was signed with the
    /// shared secret, then check it was produced under the same election.
    pub fn open<T: Serialize>(&self, envelope: Envelope<T>) -> Result<T> {
        if envelope.sender != self.own.peer() {
            return Err(Error::Unauthorized(format!(
                "envelope from {} sent to {}",
                envelope.sender, self.own
            )));
        }
        let signature = HEXLOWER
            .decode(envelope.signature.as_bytes())
            .map_err(|_| Error::Unauthorized("malformed envelope signature".to_string()))?;
        self.mac(envelope.sender, &envelope.config_digest, &envelope.payload)?
            .verify_slice(&signature)
            .map_err(|_| {
                Error::Unauthorized(format!("bad envelope signature from {}", envelope.sender))
            })?;

        if envelope.config_digest != self.config_digest {
            return Err(MismatchError::ConfigDigest {
                peer: envelope.config_digest,
            }
            .into());
        }
        Ok(envelope.payload)
    }

    fn mac<T: Serialize>(
        &self,
        sender: CollectorId,
        config_digest: &str,
        payload: &T,
    ) -> Result<HmacSha256> {
        let message = serde_json::to_vec(&(sender, config_digest, payload))
            .map_err(|e| Error::BadRequest(format!("unencodable peer message: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| Error::Unauthorized("unusable peer secret".to_string()))?;
        mac.update(&message);
        Ok(mac)
    }
}

/// Delivery of reconciliation messages to the other collector.
#[rocket::async_trait]
pub trait PeerLink: Send + Sync {
    /// Deliver this collector's frozen snapshot.
    async fn send_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Deliver the digest of this collector's reconstructed tally.
    async fn send_confirmation(&self, tally_digest: &str) -> Result<()>;
}

/// The peer link used by a running collector, as managed state.
#[derive(Clone)]
pub struct PeerChannel(pub Arc<dyn PeerLink>);

/// A peer reached over HTTP.
pub struct HttpPeer {
    http: reqwest::Client,
    base_url: String,
    auth: PeerAuth,
}

impl HttpPeer {
    pub fn new(base_url: &str, auth: PeerAuth, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, what: &str, payload: &T) -> Result<()> {
        let envelope = self.auth.seal(payload)?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(&envelope)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::from_response(response, what).await)
        }
    }
}

#[rocket::async_trait]
impl PeerLink for HttpPeer {
    async fn send_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        debug!("Sending snapshot to {}", self.auth.own().peer());
        self.post("/peer/snapshot", "snapshot delivery", snapshot)
            .await
    }

    async fn send_confirmation(&self, tally_digest: &str) -> Result<()> {
        debug!("Sending tally digest to {}", self.auth.own().peer());
        let confirmation = TallyConfirmation {
            tally_digest: tally_digest.to_string(),
        };
        self.post("/peer/confirm", "tally confirmation", &confirmation)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            partial_tally: vec![17, 404],
            partial_location_sum: 9,
            voter_count: 3,
        }
    }

    fn pair() -> (PeerAuth, PeerAuth) {
        (
            PeerAuth::new(CollectorId::A, "cfg".to_string(), b"shared"),
            PeerAuth::new(CollectorId::B, "cfg".to_string(), b"shared"),
        )
    }

    #[test]
    fn sealed_envelopes_open_at_the_peer() {
        let (a, b) = pair();
        let envelope = a.seal(snapshot()).unwrap();
        assert_eq!(envelope.sender, CollectorId::A);
        assert_eq!(b.open(envelope).unwrap(), snapshot());
    }

    #[test]
    fn tampered_payloads_are_unauthorized() {
        let (a, b) = pair();
        let mut envelope = a.seal(snapshot()).unwrap();
        envelope.payload.partial_tally[0] += 1;
        assert!(matches!(b.open(envelope), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn foreign_keys_and_senders_are_unauthorized() {
        let (_, b) = pair();
        let stranger = PeerAuth::new(CollectorId::A, "cfg".to_string(), b"guessed");
        let forged = stranger.seal(snapshot()).unwrap();
        assert!(matches!(b.open(forged), Err(Error::Unauthorized(_))));

        // A collector never accepts messages claiming to be from itself.
        let echo = b.seal(snapshot()).unwrap();
        assert!(matches!(b.open(echo), Err(Error::Unauthorized(_))));

        let (a, b) = pair();
        let mut garbled = a.seal(snapshot()).unwrap();
        garbled.signature = "not hex".to_string();
        assert!(matches!(b.open(garbled), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn different_elections_are_a_protocol_mismatch() {
        let a = PeerAuth::new(CollectorId::A, "other-cfg".to_string(), b"shared");
        let (_, b) = pair();
        let envelope = a.seal(snapshot()).unwrap();
        assert_eq!(
            b.open(envelope),
            Err(Error::ProtocolMismatch(MismatchError::ConfigDigest {
                peer: "other-cfg".to_string()
            }))
        );
    }

    #[test]
    fn envelopes_use_camel_case_on_the_wire() {
        let (a, _) = pair();
        let json = serde_json::to_value(a.seal(snapshot()).unwrap()).unwrap();
        assert_eq!(json["sender"], "a");
        assert_eq!(json["configDigest"], "cfg");
        assert_eq!(json["payload"]["voterCount"], 3);
        assert_eq!(json["signature"].as_str().unwrap().len(), 64);
    }
}

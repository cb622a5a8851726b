//! Drives a closed collector through the exchange with its peer.
//!
//! Both collectors run the same steps: push our snapshot, wait until the
//! peer's snapshot has let us reconstruct the tally, push the tally's digest,
//! then wait until the peer's digest has confirmed it. Deliveries are
//! idempotent at the receiver, so each side may retry freely.

use split_tally_protocol::Snapshot;

use super::Collector;
use crate::error::{Error, Result};
use crate::model::PublishedResult;
use crate::retry::with_retry;

/// Reconcile, halting the collector if that fails for any reason.
pub async fn drive(collector: Collector, snapshot: Snapshot) -> Result<PublishedResult> {
    let outcome = run(&collector, &snapshot).await;
    if let Err(err) = &outcome {
        collector.handle.halt(err.to_string()).await;
    }
    outcome
}

async fn run(collector: &Collector, snapshot: &Snapshot) -> Result<PublishedResult> {
    let handle = &collector.handle;
    let peer = &collector.peer;
    let id = handle.id();

    with_retry(collector.retry, "snapshot delivery", || peer.send_snapshot(snapshot)).await?;
    info!("{id} delivered its snapshot to {}", id.peer());

    let progress = handle
        .wait_until(collector.reconcile_timeout, "peer snapshot", |p| {
            p.tally_digest.is_some()
        })
        .await?;
    let digest = progress
        .tally_digest
        .ok_or_else(|| Error::Halted("reconciled without a tally digest".to_string()))?;

    with_retry(collector.retry, "tally confirmation", || {
        peer.send_confirmation(&digest)
    })
    .await?;
    debug!("{id} delivered its tally digest to {}", id.peer());

    let progress = handle
        .wait_until(collector.reconcile_timeout, "peer confirmation", |p| {
            p.published.is_some()
        })
        .await?;
    progress
        .published
        .ok_or_else(|| Error::Halted("published without a result".to_string()))
}

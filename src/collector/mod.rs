//! A running collector.
//!
//! The aggregate lives inside a single [`owner`] task. Request handlers, the
//! reconciliation driver and the scheduled close all talk to it through a
//! [`CollectorHandle`], which queues commands on a bounded channel and waits
//! for the owner's reply. Lifecycle changes are published on a watch channel
//! so status reads never queue behind submissions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    sync::{mpsc, oneshot, watch},
    time::{timeout, Duration},
};
use split_tally_protocol::{
    BallotShare, CollectorId, ElectionConfig, EligibilityPredicate, Lifecycle, Snapshot,
};

use crate::error::{Error, Result};
use crate::model::{PublishedResult, StatusView};
use crate::peer::PeerLink;
use crate::retry::RetryPolicy;
use crate::scheduled_task::ScheduledTask;

mod owner;
pub mod reconcile;

use owner::{Command, Owner};

/// Tunables for one collector.
#[derive(Clone)]
pub struct CollectorSettings {
    pub collector: CollectorId,
    pub queue_depth: usize,
    pub submission_timeout: Duration,
    pub retry: RetryPolicy,
    pub reconcile_timeout: Duration,
    pub predicate: Arc<dyn EligibilityPredicate>,
}

/// What the owner has published about its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub lifecycle: Lifecycle,
    pub voters_counted: u64,
    /// Digest of the reconstructed tally, once reconciled. Never served to
    /// operators: over a small electorate it identifies the tally.
    pub tally_digest: Option<String>,
    pub published: Option<PublishedResult>,
    pub failure: Option<String>,
}

impl Progress {
    fn initial() -> Self {
        Self {
            lifecycle: Lifecycle::Open,
            voters_counted: 0,
            tally_digest: None,
            published: None,
            failure: None,
        }
    }
}

/// Cheap, cloneable access to a collector's owner task.
#[derive(Clone)]
pub struct CollectorHandle {
    id: CollectorId,
    commands: mpsc::Sender<Command>,
    progress: watch::Receiver<Progress>,
    submission_timeout: Duration,
}

impl CollectorHandle {
    /// Create the aggregate for `config` and start its owner task.
    pub fn spawn(config: Arc<ElectionConfig>, settings: &CollectorSettings) -> Self {
        let (handle, owner) = Self::channel(config, settings);
        tokio::spawn(owner.run());
        handle
    }

    /// Create a handle and its owner without starting the owner.
    fn channel(config: Arc<ElectionConfig>, settings: &CollectorSettings) -> (Self, Owner) {
        let (commands, inbox) = mpsc::channel(settings.queue_depth.max(1));
        let (progress_tx, progress) = watch::channel(Progress::initial());
        let owner = Owner::new(
            settings.collector,
            config,
            settings.predicate.clone(),
            inbox,
            progress_tx,
        );
        let handle = Self {
            id: settings.collector,
            commands,
            progress,
            submission_timeout: settings.submission_timeout,
        };
        (handle, owner)
    }

    pub fn id(&self) -> CollectorId {
        self.id
    }

    pub fn progress(&self) -> Progress {
        self.progress.borrow().clone()
    }

    pub fn status(&self) -> StatusView {
        let progress = self.progress.borrow();
        StatusView {
            collector: self.id,
            lifecycle: progress.lifecycle,
            voters_counted: progress.voters_counted,
            published: progress.published.is_some(),
            failure: progress.failure.clone(),
        }
    }

    /// Count one voter's share. If the owner does not answer within the
    /// submission timeout the share is abandoned, and the owner will skip it.
    pub async fn submit_share(&self, share: BallotShare) -> Result<()> {
        let request = self.request(|reply| Command::Submit { share, reply });
        timeout(self.submission_timeout, request)
            .await
            .map_err(|_| {
                Error::Network(format!(
                    "{} did not answer within {}ms",
                    self.id,
                    self.submission_timeout.as_millis()
                ))
            })?
    }

    /// Stop accepting shares and return the frozen snapshot.
    pub async fn close(&self) -> Result<Snapshot> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Combine the closed aggregate with the peer's snapshot, returning the
    /// digest of the reconstructed tally.
    pub async fn exchange_with_peer(&self, snapshot: Snapshot) -> Result<String> {
        self.request(|reply| Command::Exchange { snapshot, reply })
            .await
    }

    /// Accept the peer's snapshot whenever it arrives. It is held until this
    /// collector has closed, then exchanged.
    pub async fn offer_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.request(|reply| Command::PeerSnapshot { snapshot, reply })
            .await
    }

    /// Accept the peer's tally digest, publishing once it matches ours.
    pub async fn offer_confirmation(&self, tally_digest: String) -> Result<()> {
        self.request(|reply| Command::PeerConfirmation {
            tally_digest,
            reply,
        })
        .await
    }

    /// Stop this collector for good. The first reason given is kept.
    /// Returns once the halt shows in [`Self::progress`].
    pub async fn halt(&self, reason: String) {
        let (reply, applied) = oneshot::channel();
        if self
            .commands
            .send(Command::Halt { reason, reply })
            .await
            .is_err()
            || applied.await.is_err()
        {
            warn!("{} owner already stopped", self.id);
        }
    }

    /// Wait until `ready` holds, failing early if the collector halts.
    pub async fn wait_until<F>(&self, limit: Duration, what: &str, ready: F) -> Result<Progress>
    where
        F: Fn(&Progress) -> bool,
    {
        let mut progress = self.progress.clone();
        let wait = async {
            loop {
                {
                    let current = progress.borrow_and_update();
                    if let Some(reason) = &current.failure {
                        return Err(Error::Halted(reason.clone()));
                    }
                    if ready(&current) {
                        return Ok(current.clone());
                    }
                }
                if progress.changed().await.is_err() {
                    return Err(stopped());
                }
            }
        };
        timeout(limit, wait).await.map_err(|_| {
            Error::Network(format!("{what} not received within {}ms", limit.as_millis()))
        })?
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }
}

fn stopped() -> Error {
    Error::Halted("collector task has stopped".to_string())
}

/// A collector together with its link to the peer, as managed state.
#[derive(Clone)]
pub struct Collector {
    handle: CollectorHandle,
    peer: Arc<dyn PeerLink>,
    retry: RetryPolicy,
    reconcile_timeout: Duration,
}

impl Collector {
    pub fn new(handle: CollectorHandle, peer: Arc<dyn PeerLink>, settings: &CollectorSettings) -> Self {
        Self {
            handle,
            peer,
            retry: settings.retry,
            reconcile_timeout: settings.reconcile_timeout,
        }
    }

    pub fn handle(&self) -> &CollectorHandle {
        &self.handle
    }

    /// Close collection and start reconciling with the peer in the background.
    pub async fn close(&self) -> Result<Snapshot> {
        let snapshot = self.handle.close().await?;
        tokio::spawn(reconcile::drive(self.clone(), snapshot.clone()));
        Ok(snapshot)
    }

    /// Close collection automatically at `at`.
    pub fn close_at(self, at: DateTime<Utc>) -> ScheduledTask<()> {
        info!("{} will close collection at {at}", self.handle.id());
        ScheduledTask::new(
            async move {
                match self.close().await {
                    Ok(snapshot) => info!(
                        "Scheduled close of {} froze {} voters",
                        self.handle.id(),
                        snapshot.voter_count
                    ),
                    Err(Error::Transition(e)) => debug!("Scheduled close skipped: {e}"),
                    Err(e) => error!("Scheduled close of {} failed: {e}", self.handle.id()),
                }
            },
            at,
        )
    }
}

use std::sync::Arc;

use rocket::tokio::sync::{mpsc, oneshot, watch};
use split_tally_protocol::{
    cross_check, Aggregator, BallotShare, Closed, CollectorId, ElectionConfig,
    EligibilityPredicate, Lifecycle, LocationVerdict, MismatchError, Open, Reconciled, Snapshot,
    TransitionError,
};

use super::Progress;
use crate::error::{Error, Result};
use crate::model::PublishedResult;

/// Requests to the owner task. Each carries the channel its answer goes back on.
pub(crate) enum Command {
    Submit {
        share: BallotShare,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    Exchange {
        snapshot: Snapshot,
        reply: oneshot::Sender<Result<String>>,
    },
    PeerSnapshot {
        snapshot: Snapshot,
        reply: oneshot::Sender<Result<()>>,
    },
    PeerConfirmation {
        tally_digest: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Halt {
        reason: String,
        reply: oneshot::Sender<()>,
    },
}

/// The collector's aggregate and everything learned about it.
enum Phase {
    Open(Aggregator<Open>),
    Closed(Aggregator<Closed>),
    Reconciled(Box<Outcome>),
    Halted {
        reason: String,
        lifecycle: Lifecycle,
        voters_counted: u64,
    },
}

struct Outcome {
    reconciled: Reconciled,
    peer_snapshot: Snapshot,
    verdict: LocationVerdict,
    digest: String,
    published: bool,
}

/// Sole owner of a collector's aggregate. Commands are applied one at a
/// time, in arrival order.
pub(crate) struct Owner {
    id: CollectorId,
    phase: Phase,
    predicate: Arc<dyn EligibilityPredicate>,
    pending_snapshot: Option<Snapshot>,
    pending_confirmation: Option<String>,
    inbox: mpsc::Receiver<Command>,
    progress: watch::Sender<Progress>,
}

impl Owner {
    pub(crate) fn new(
        id: CollectorId,
        config: Arc<ElectionConfig>,
        predicate: Arc<dyn EligibilityPredicate>,
        inbox: mpsc::Receiver<Command>,
        progress: watch::Sender<Progress>,
    ) -> Self {
        Self {
            id,
            phase: Phase::Open(Aggregator::new(config)),
            predicate,
            pending_snapshot: None,
            pending_confirmation: None,
            inbox,
            progress,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("{} open for submissions", self.id);
        while let Some(command) = self.inbox.recv().await {
            self.handle(command);
        }
        debug!("{} owner stopped", self.id);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { share, reply } => {
                // The submitter gave up waiting; it was told the vote failed.
                if reply.is_closed() {
                    debug!("{} skipping abandoned submission", self.id);
                    return;
                }
                let result = self.submit(&share);
                self.respond(reply, result);
            }
            Command::Close { reply } => {
                let result = self.close();
                if result.is_ok() {
                    // A failure here halts the collector; the close itself stands.
                    let _ = self.advance();
                }
                self.respond(reply, result);
            }
            Command::Exchange { snapshot, reply } => {
                let result = self.exchange(snapshot);
                let result = result.and_then(|digest| self.advance().map(|_| digest));
                self.respond(reply, result);
            }
            Command::PeerSnapshot { snapshot, reply } => {
                let result = self.offer_snapshot(snapshot).and_then(|_| self.advance());
                self.respond(reply, result);
            }
            Command::PeerConfirmation {
                tally_digest,
                reply,
            } => {
                let result = self
                    .offer_confirmation(tally_digest)
                    .and_then(|_| self.advance());
                self.respond(reply, result);
            }
            Command::Halt { reason, reply } => {
                self.halt(reason);
                self.respond(reply, ());
            }
        }
    }

    fn respond<T>(&mut self, reply: oneshot::Sender<T>, result: T) {
        self.publish_progress();
        if reply.send(result).is_err() {
            debug!("{} reply dropped by requester", self.id);
        }
    }

    fn submit(&mut self, share: &BallotShare) -> Result<()> {
        match &mut self.phase {
            Phase::Open(aggregator) => {
                aggregator.submit_share(share)?;
                debug!("{} counted voter {}", self.id, share.voter_id);
                Ok(())
            }
            Phase::Halted { reason, .. } => Err(Error::Halted(reason.clone())),
            _ => Err(TransitionError::NotOpen.into()),
        }
    }

    fn close(&mut self) -> Result<Snapshot> {
        let aggregator = match self.take_phase() {
            Phase::Open(aggregator) => aggregator,
            other => return Err(self.restore(other, Lifecycle::Open)),
        };
        let (closed, snapshot) = aggregator.close();
        info!(
            "{} closed collection with {} voters",
            self.id, snapshot.voter_count
        );
        self.phase = Phase::Closed(closed);
        Ok(snapshot)
    }

    fn exchange(&mut self, peer_snapshot: Snapshot) -> Result<String> {
        let aggregator = match self.take_phase() {
            Phase::Closed(aggregator) => aggregator,
            other => return Err(self.restore(other, Lifecycle::Closed)),
        };
        let voters_counted = aggregator.voter_count();
        let mut reconciled = match aggregator.exchange_with_peer(&peer_snapshot) {
            Ok(reconciled) => reconciled,
            Err(mismatch) => {
                self.phase = Phase::Halted {
                    reason: String::new(),
                    lifecycle: Lifecycle::Closed,
                    voters_counted,
                };
                self.halt(format!("protocol mismatch: {mismatch}"));
                return Err(mismatch.into());
            }
        };

        let voters = reconciled.tally().total_voters;
        if voters < 2 {
            warn!(
                "{} reconciled an election with {voters} voter(s); the tally reveals their ballots",
                self.id
            );
        }
        let verdict = match reconciled.take_location() {
            Some(location) => location.evaluate(self.predicate.as_ref()),
            None => LocationVerdict {
                predicate: self.predicate.describe(),
                eligible: false,
            },
        };
        info!(
            "{} location verdict: {} -> {}",
            self.id, verdict.predicate, verdict.eligible
        );

        let digest = reconciled.tally().digest();
        self.pending_snapshot = None;
        self.phase = Phase::Reconciled(Box::new(Outcome {
            reconciled,
            peer_snapshot,
            verdict,
            digest: digest.clone(),
            published: false,
        }));
        Ok(digest)
    }

    fn offer_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        let known = match &self.phase {
            Phase::Halted { reason, .. } => return Err(Error::Halted(reason.clone())),
            Phase::Reconciled(outcome) => Some(outcome.peer_snapshot.clone()),
            Phase::Open(_) | Phase::Closed(_) => self.pending_snapshot.clone(),
        };
        match known {
            None => {
                debug!("{} holding peer snapshot", self.id);
                self.pending_snapshot = Some(snapshot);
                Ok(())
            }
            Some(known) if known == snapshot => Ok(()),
            Some(_) => Err(self.conflict("snapshot")),
        }
    }

    fn offer_confirmation(&mut self, tally_digest: String) -> Result<()> {
        if let Phase::Halted { reason, .. } = &self.phase {
            return Err(Error::Halted(reason.clone()));
        }
        match &self.pending_confirmation {
            None => {
                self.pending_confirmation = Some(tally_digest);
                Ok(())
            }
            Some(known) if *known == tally_digest => Ok(()),
            Some(_) => Err(self.conflict("tally confirmation")),
        }
    }

    /// Take whatever step the messages received so far allow.
    fn advance(&mut self) -> Result<()> {
        if matches!(self.phase, Phase::Closed(_)) {
            if let Some(snapshot) = self.pending_snapshot.take() {
                self.exchange(snapshot)?;
            }
        }
        let peer_digest = match (&self.phase, &self.pending_confirmation) {
            (Phase::Reconciled(outcome), Some(digest)) if !outcome.published => digest.clone(),
            _ => return Ok(()),
        };
        self.confirm(&peer_digest)
    }

    fn confirm(&mut self, peer_digest: &str) -> Result<()> {
        let Phase::Reconciled(outcome) = &mut self.phase else {
            return Ok(());
        };
        match cross_check(outcome.reconciled.tally(), peer_digest) {
            Ok(()) => {
                outcome.published = true;
                info!(
                    "{} published tally {:?} over {} voters",
                    self.id,
                    outcome.reconciled.tally().per_candidate,
                    outcome.reconciled.tally().total_voters
                );
                Ok(())
            }
            Err(mismatch) => {
                self.halt(format!("protocol mismatch: {mismatch}"));
                Err(mismatch.into())
            }
        }
    }

    fn conflict(&mut self, what: &'static str) -> Error {
        let mismatch = MismatchError::Conflicting(what);
        self.halt(format!("protocol mismatch: {mismatch}"));
        mismatch.into()
    }

    /// Stop for good. Halting again keeps the first reason.
    fn halt(&mut self, reason: String) {
        let (lifecycle, voters_counted) = match &self.phase {
            Phase::Halted { reason: first, .. } if !first.is_empty() => return,
            Phase::Halted {
                lifecycle,
                voters_counted,
                ..
            } => (*lifecycle, *voters_counted),
            _ => {
                let progress = self.current_progress();
                (progress.lifecycle, progress.voters_counted)
            }
        };
        error!("{} halted: {reason}", self.id);
        self.phase = Phase::Halted {
            reason,
            lifecycle,
            voters_counted,
        };
    }

    fn take_phase(&mut self) -> Phase {
        std::mem::replace(
            &mut self.phase,
            Phase::Halted {
                reason: String::new(),
                lifecycle: Lifecycle::Open,
                voters_counted: 0,
            },
        )
    }

    /// Put back a phase that did not allow the requested transition, and
    /// describe why. `wanted` is the lifecycle the transition starts from.
    fn restore(&mut self, phase: Phase, wanted: Lifecycle) -> Error {
        let error = match (&phase, wanted) {
            (Phase::Halted { reason, .. }, _) => Error::Halted(reason.clone()),
            (Phase::Open(_), _) => TransitionError::NotClosed.into(),
            (Phase::Closed(_) | Phase::Reconciled(_), Lifecycle::Open) => {
                TransitionError::AlreadyClosed.into()
            }
            (Phase::Closed(_), _) => TransitionError::NotOpen.into(),
            (Phase::Reconciled(_), _) => TransitionError::AlreadyReconciled.into(),
        };
        self.phase = phase;
        error
    }

    fn current_progress(&self) -> Progress {
        match &self.phase {
            Phase::Open(aggregator) => Progress {
                lifecycle: Lifecycle::Open,
                voters_counted: aggregator.voter_count(),
                ..Progress::initial()
            },
            Phase::Closed(aggregator) => Progress {
                lifecycle: Lifecycle::Closed,
                voters_counted: aggregator.voter_count(),
                ..Progress::initial()
            },
            Phase::Reconciled(outcome) => {
                let tally = outcome.reconciled.tally();
                Progress {
                    lifecycle: Lifecycle::Reconciled,
                    voters_counted: tally.total_voters,
                    tally_digest: Some(outcome.digest.clone()),
                    published: outcome.published.then(|| PublishedResult {
                        tally: tally.clone(),
                        eligibility: outcome.verdict.clone(),
                    }),
                    failure: None,
                }
            }
            Phase::Halted {
                reason,
                lifecycle,
                voters_counted,
            } => Progress {
                lifecycle: *lifecycle,
                voters_counted: *voters_counted,
                failure: Some(reason.clone()),
                ..Progress::initial()
            },
        }
    }

    fn publish_progress(&self) {
        let progress = self.current_progress();
        self.progress.send_if_modified(|current| {
            if *current == progress {
                false
            } else {
                *current = progress;
                true
            }
        });
    }
}

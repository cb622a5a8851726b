use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::{
    fairing::{Fairing, Info, Kind},
    serde::json::serde_json,
    tokio::{fs, time::Duration},
    Build, Orbit, Rocket,
};
use serde::Deserialize;
use split_tally_protocol::{CollectorId, ElectionConfig, PredicateSpec};

use crate::collector::{Collector, CollectorHandle, CollectorSettings};
use crate::peer::{HttpPeer, PeerAuth, PeerChannel, PeerLink};
use crate::retry::RetryPolicy;
use crate::scheduled_task::ScheduledTask;

/// Collector configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    collector: CollectorId,
    election_config: PathBuf,
    peer_url: String,
    peer_timeout_ms: u64,
    peer_attempts: u32,
    peer_backoff_ms: u64,
    reconcile_timeout_secs: u64,
    submission_timeout_ms: u64,
    queue_depth: usize,
    #[serde(default)]
    close_at: Option<DateTime<Utc>>,
    #[serde(default)]
    location_predicate: PredicateSpec,
    // secrets
    peer_secret: String,
}

impl Config {
    /// Which of the two collectors this server is.
    pub fn collector(&self) -> CollectorId {
        self.collector
    }

    /// Where the election administrator's config file lives.
    pub fn election_config(&self) -> &Path {
        &self.election_config
    }

    /// Base URL of the other collector.
    pub fn peer_url(&self) -> &str {
        &self.peer_url
    }

    /// Key shared with the other collector for signing peer messages.
    pub fn peer_secret(&self) -> &[u8] {
        self.peer_secret.as_bytes()
    }

    /// Limit on a single request to the peer.
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.peer_attempts.max(1),
            initial_backoff: Duration::from_millis(self.peer_backoff_ms),
            timeout: self.peer_timeout(),
        }
    }

    /// How long to wait for each of the peer's reconciliation messages.
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// How long a voter's submission may wait for the aggregate.
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }

    /// When to stop accepting shares without an operator, if ever.
    pub fn close_at(&self) -> Option<DateTime<Utc>> {
        self.close_at
    }

    pub fn location_predicate(&self) -> &PredicateSpec {
        &self.location_predicate
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            collector: self.collector,
            queue_depth: self.queue_depth,
            submission_timeout: self.submission_timeout(),
            retry: self.retry_policy(),
            reconcile_timeout: self.reconcile_timeout(),
            predicate: Arc::new(self.location_predicate.clone()),
        }
    }
}

/// A fairing that loads the collector config and the election config it
/// points to, and puts both in managed state. An election config that is
/// already managed is kept as is.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load collector config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Load the election, unless one was supplied directly.
        if rocket.state::<Arc<ElectionConfig>>().is_none() {
            let election = match load_election(config.election_config()).await {
                Ok(election) => election,
                Err(e) => {
                    error!("Failed to load election config: {e}");
                    return Err(rocket);
                }
            };
            rocket = rocket.manage(Arc::new(election));
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Read and validate the election administrator's config file.
pub async fn load_election(path: &Path) -> Result<ElectionConfig, String> {
    let contents = fs::read_to_string(path)
        .await
        .map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_str(&contents).map_err(|e| format!("{}: {e}", path.display()))
}

/// A fairing that starts the collector's aggregate, connects it to the peer
/// and schedules the automatic close. Must be attached after [`ConfigFairing`].
pub struct CollectorFairing;

#[rocket::async_trait]
impl Fairing for CollectorFairing {
    fn info(&self) -> Info {
        Info {
            name: "Collector",
            kind: Kind::Ignite | Kind::Shutdown,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (collector, auth, schedule) = match start_collector(&rocket) {
            Ok(started) => started,
            Err(e) => {
                error!("Failed to start collector: {e}");
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(collector).manage(auth);
        if let Some(schedule) = schedule {
            rocket = rocket.manage(schedule);
        }
        Ok(rocket)
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(schedule) = rocket.state::<ScheduledTask<()>>() {
            debug!("Cancelling close scheduled for {}", schedule.run_at());
            schedule.cancel();
        }
    }
}

fn start_collector(
    rocket: &Rocket<Build>,
) -> Result<(Collector, PeerAuth, Option<ScheduledTask<()>>), String> {
    let config = rocket
        .state::<Config>()
        .ok_or("collector config not loaded")?;
    let election = rocket
        .state::<Arc<ElectionConfig>>()
        .ok_or("election config not loaded")?
        .clone();

    let auth = PeerAuth::new(config.collector(), election.digest(), config.peer_secret());
    let peer: Arc<dyn PeerLink> = match rocket.state::<PeerChannel>() {
        Some(PeerChannel(peer)) => peer.clone(),
        None => {
            let peer = HttpPeer::new(config.peer_url(), auth.clone(), config.peer_timeout())
                .map_err(|e| e.to_string())?;
            Arc::new(peer)
        }
    };

    let settings = config.collector_settings();
    let handle = CollectorHandle::spawn(election.clone(), &settings);
    let collector = Collector::new(handle, peer, &settings);
    info!(
        "{} serving {} candidates and {} voters, peer at {}, eligibility: {}",
        config.collector(),
        election.candidates().len(),
        election.total_voters(),
        config.peer_url(),
        settings.predicate.describe()
    );

    let schedule = config
        .close_at()
        .map(|at| collector.clone().close_at(at));
    Ok((collector, auth, schedule))
}

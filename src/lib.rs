//! Collector server for a two-collector secret-shared tally.
//!
//! Each collector receives one additive share of every voter's ballot and
//! location code, sums them, and on close reconciles with the other
//! collector to publish the tally. See [`split_tally_protocol`] for the
//! arithmetic and its privacy caveat.

#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate collector_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod peer;
pub mod retry;
pub mod scheduled_task;
#[cfg(test)]
mod testing;

pub use config::Config;

use config::{CollectorFairing, ConfigFairing};
use logging::RequestLogger;

pub fn build() -> Rocket<Build> {
    assemble(rocket::build())
}

fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .attach(RequestLogger)
        .attach(ConfigFairing)
        .attach(CollectorFairing)
        .mount("/", api::routes())
}

/// A collector for the test election whose peer accepts every message.
#[cfg(test)]
pub(crate) fn test_rocket(collector: split_tally_protocol::CollectorId) -> Rocket<Build> {
    use std::sync::Arc;

    testing::init_logging();
    let figment = rocket::Config::figment()
        .merge(("collector", collector))
        .merge(("election_config", "election_config.json"))
        .merge(("peer_url", "http://127.0.0.1:9"))
        .merge(("peer_secret", testing::PEER_SECRET))
        .merge(("peer_timeout_ms", 500))
        .merge(("peer_attempts", 2))
        .merge(("peer_backoff_ms", 10))
        .merge(("reconcile_timeout_secs", 30))
        .merge(("submission_timeout_ms", 5000))
        .merge(("queue_depth", 64));
    let rocket = rocket::custom(figment)
        .manage(Arc::new(testing::election()))
        .manage(peer::PeerChannel(Arc::new(testing::AcceptingPeer)));
    assemble(rocket)
}

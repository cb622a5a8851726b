//! Command line tool for the election administrator, voters and operators.
//! It talks to collectors through the same client the collectors use, and
//! splits ballots with the same protocol code they verify against.

use std::collections::BTreeSet;
use std::fs;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use rocket::serde::json::serde_json;
use rocket::tokio::time::Duration;

use split_tally::client::CollectorClient;
use split_tally::error::Error as CollectorError;
use split_tally::model::PublishedResult;
use split_tally::retry::RetryPolicy;
use split_tally_protocol::{generate_shares, Ballot, CollectorId, ElectionConfig};

const PROGRAM_NAME: &str = "tally-cli";

const ABOUT_TEXT: &str = "Set up, vote in, close and read a two-collector election.

EXIT CODES:
     0: Success.
     1: Error.
     2: Refused by a collector, or an invalid ballot.
   255: The collectors published different results.";

const CONFIG: &str = "CONFIG";
const ATTEMPTS: &str = "ATTEMPTS";
const TIMEOUT: &str = "TIMEOUT";
const CANDIDATE: &str = "CANDIDATE";
const VOTERS: &str = "VOTERS";
const MODULUS: &str = "MODULUS";
const COLLECTOR_A: &str = "COLLECTOR_A";
const COLLECTOR_B: &str = "COLLECTOR_B";
const LOCATION_CODES: &str = "LOCATION_CODES";
const VOTER: &str = "VOTER";
const LOCATION: &str = "LOCATION";

/// The largest 64-bit Mersenne prime, 2^61 - 1.
const DEFAULT_MODULUS: &str = "2305843009213693951";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .arg(
            Arg::new(CONFIG)
                .long("config")
                .help("Path of the election config file")
                .default_value("election_config.json")
                .global(true),
        )
        .arg(
            Arg::new(ATTEMPTS)
                .long("attempts")
                .help("How many times to try each collector request")
                .value_parser(value_parser!(u32).range(1..))
                .default_value("5")
                .global(true),
        )
        .arg(
            Arg::new(TIMEOUT)
                .long("timeout-ms")
                .help("Limit on each collector request, in milliseconds")
                .value_parser(value_parser!(u64))
                .default_value("2000")
                .global(true),
        )
        .subcommand(
            Command::new("setup")
                .about("Validate election parameters and write the election config")
                .arg(
                    Arg::new(CANDIDATE)
                        .long("candidate")
                        .help("A candidate, in ballot order; repeat for each")
                        .action(ArgAction::Append)
                        .required(true),
                )
                .arg(
                    Arg::new(VOTERS)
                        .long("voters")
                        .help("Size of the roster; voters are named voter-1 to voter-N")
                        .value_parser(value_parser!(u64).range(1..))
                        .required(true),
                )
                .arg(
                    Arg::new(MODULUS)
                        .long("modulus")
                        .help("Prime modulus for the shares")
                        .value_parser(value_parser!(u64))
                        .default_value(DEFAULT_MODULUS),
                )
                .arg(
                    Arg::new(COLLECTOR_A)
                        .long("collector-a")
                        .default_value("http://127.0.0.1:8001"),
                )
                .arg(
                    Arg::new(COLLECTOR_B)
                        .long("collector-b")
                        .default_value("http://127.0.0.1:8002"),
                )
                .arg(
                    Arg::new(LOCATION_CODES)
                        .long("location-codes")
                        .help("Number of location codes voters choose from")
                        .value_parser(value_parser!(u64).range(1..))
                        .default_value("1"),
                ),
        )
        .subcommand(
            Command::new("vote")
                .about("Split a ballot and submit one share to each collector")
                .arg(Arg::new(VOTER).long("voter").required(true))
                .arg(Arg::new(CANDIDATE).long("candidate").required(true))
                .arg(
                    Arg::new(LOCATION)
                        .long("location")
                        .help("The voter's location code")
                        .value_parser(value_parser!(u64))
                        .default_value("0"),
                ),
        )
        .subcommand(Command::new("close").about("Stop both collectors accepting shares"))
        .subcommand(
            Command::new("result").about("Fetch and cross-check the published result"),
        )
}

/// Errors that this program may produce.
#[derive(Debug, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// The election config could not be built or read.
    Config(String),
    /// A collector, or the ballot itself, failed or refused.
    Collector(CollectorError),
    /// Both collectors published, but not the same result.
    Disagreement(Box<[PublishedResult; 2]>),
}

impl From<CollectorError> for Error {
    fn from(err: CollectorError) -> Self {
        Self::Collector(err)
    }
}

fn retry_policy(args: &ArgMatches) -> RetryPolicy {
    RetryPolicy {
        attempts: args.get_one::<u32>(ATTEMPTS).copied().unwrap_or(5),
        timeout: Duration::from_millis(args.get_one::<u64>(TIMEOUT).copied().unwrap_or(2000)),
        ..RetryPolicy::default()
    }
}

fn load_config(path: &str) -> Result<ElectionConfig, Error> {
    let contents = fs::read_to_string(path).map_err(|e| Error::IO(format!("{path}: {e}")))?;
    serde_json::from_str(&contents).map_err(|e| Error::Config(format!("{path}: {e}")))
}

fn clients(config: &ElectionConfig, retry: RetryPolicy) -> Result<[CollectorClient; 2], Error> {
    let [a, b] = CollectorId::both();
    Ok([
        CollectorClient::new(a, config.collector_endpoint(a), retry)?,
        CollectorClient::new(b, config.collector_endpoint(b), retry)?,
    ])
}

/// Build, validate and write an election config.
fn setup(path: &str, args: &ArgMatches) -> Result<ElectionConfig, Error> {
    let candidates = args
        .get_many::<String>(CANDIDATE)
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let voters = args.get_one::<u64>(VOTERS).copied().unwrap_or_default();
    let roster: BTreeSet<String> = (1..=voters).map(|n| format!("voter-{n}")).collect();
    let endpoint = |id: &str| args.get_one::<String>(id).cloned().unwrap_or_default();

    let config = ElectionConfig::new(
        candidates,
        roster,
        args.get_one::<u64>(MODULUS).copied().unwrap_or_default(),
        [endpoint(COLLECTOR_A), endpoint(COLLECTOR_B)],
        args.get_one::<u64>(LOCATION_CODES).copied().unwrap_or(1),
    )
    .map_err(|e| Error::Config(e.to_string()))?;

    let json =
        serde_json::to_string_pretty(&config).map_err(|e| Error::Config(e.to_string()))?;
    fs::write(path, json).map_err(|e| Error::IO(format!("{path}: {e}")))?;
    Ok(config)
}

/// Submit a ballot to both collectors. It only counts once both have it.
async fn vote(config: &ElectionConfig, args: &ArgMatches, retry: RetryPolicy) -> Result<(), Error> {
    let voter = args.get_one::<String>(VOTER).cloned().unwrap_or_default();
    let candidate = args.get_one::<String>(CANDIDATE).cloned().unwrap_or_default();
    let location = args.get_one::<u64>(LOCATION).copied().unwrap_or_default();

    let ballot = Ballot::for_candidate(voter, candidate);
    let shares = generate_shares(&ballot, location, config, &mut rand::thread_rng())
        .map_err(CollectorError::from)?;
    let [for_a, for_b] = shares.into_shares();

    let [a, b] = clients(config, retry)?;
    let (at_a, at_b) = rocket::tokio::join!(a.submit_share(&for_a), b.submit_share(&for_b));
    match (at_a, at_b) {
        (Ok(_), Ok(_)) => Ok(()),
        (Err(err), Ok(_)) | (Ok(_), Err(err)) => {
            println!("Only one collector accepted the ballot; the election will not reconcile.");
            Err(err.into())
        }
        (Err(err), Err(_)) => Err(err.into()),
    }
}

async fn close(config: &ElectionConfig, retry: RetryPolicy) -> Result<(), Error> {
    for client in clients(config, retry)? {
        let receipt = client.close().await?;
        println!(
            "{} closed with {} voter{}.",
            receipt.collector,
            receipt.voter_count,
            if receipt.voter_count != 1 { "s" } else { "" }
        );
    }
    Ok(())
}

/// Fetch the result from both collectors and check they agree.
async fn result(config: &ElectionConfig, retry: RetryPolicy) -> Result<PublishedResult, Error> {
    let [a, b] = clients(config, retry)?;
    let at_a = a.published().await?;
    let at_b = b.published().await?;
    if at_a != at_b {
        return Err(Error::Disagreement(Box::new([at_a, at_b])));
    }
    Ok(at_a)
}

fn print_result(result: &PublishedResult) {
    println!("Both collectors published the same result.");
    for (candidate, count) in result.tally.per_candidate.iter() {
        println!(
            "{candidate}: {count} vote{}",
            if *count != 1 { "s" } else { "" }
        );
    }
    println!("Total voters: {}", result.tally.total_voters);
    println!(
        "Location check ({}): {}",
        result.eligibility.predicate,
        if result.eligibility.eligible {
            "passed"
        } else {
            "failed"
        }
    );
}

/// Run the chosen subcommand, report the outcome, and return the exit code.
async fn run(args: &ArgMatches) -> u8 {
    let path = args
        .get_one::<String>(CONFIG)
        .cloned()
        .unwrap_or_else(|| "election_config.json".to_string());
    let retry = retry_policy(args);

    let outcome = match args.subcommand() {
        Some(("setup", sub)) => setup(&path, sub).map(|config| {
            println!(
                "Wrote {path}: {} candidates, {} voters.",
                config.candidates().len(),
                config.total_voters()
            );
        }),
        Some((command, sub)) => match load_config(&path) {
            Ok(config) => match command {
                "vote" => vote(&config, sub, retry)
                    .await
                    .map(|_| println!("Ballot accepted by both collectors.")),
                "close" => close(&config, retry).await,
                "result" => result(&config, retry).await.map(|r| print_result(&r)),
                _ => Err(Error::Config(format!("unknown command {command}"))),
            },
            Err(err) => Err(err),
        },
        None => Err(Error::Config("no command given".to_string())),
    };

    match outcome {
        Ok(()) => 0,
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Config(msg)) => {
            println!("Invalid election config: {msg}");
            1
        }
        Err(Error::Collector(err)) if err.is_retryable() => {
            println!("Collector unreachable: {err}");
            1
        }
        Err(Error::Collector(err)) => {
            println!("Refused: {err}");
            2
        }
        Err(Error::Disagreement(results)) => {
            let [at_a, at_b] = *results;
            println!("The collectors disagree!");
            println!("collector-a: {:?}", at_a.tally.per_candidate);
            println!("collector-b: {:?}", at_b.tally.per_candidate);
            255
        }
    }
}

/// Send warnings, such as retries, to stderr.
fn init_logging() {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{l}: {m}{n}")))
        .build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(LevelFilter::Warn));
    if let Ok(config) = config {
        let _ = log4rs::init_config(config);
    }
}

#[rocket::main]
async fn main() {
    init_logging();
    let args = cli().get_matches();
    let exit_code = run(&args).await;
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config() -> String {
        std::env::temp_dir()
            .join(format!("tally-cli-{}.json", rand::random::<u32>()))
            .to_string_lossy()
            .into_owned()
    }

    #[rocket::async_test]
    async fn setup_writes_a_valid_config() {
        let path = temp_config();
        let command_line = [
            PROGRAM_NAME, "setup", "--config", &path, "--candidate", "R", "--candidate", "D",
            "--voters", "3", "--location-codes", "4",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 0);

        let config = load_config(&path).unwrap();
        assert_eq!(config.candidates(), ["R".to_string(), "D".to_string()]);
        assert_eq!(config.total_voters(), 3);
        assert!(config.is_eligible("voter-3"));
        assert_eq!(config.location_codes(), 4);
        assert_eq!(config.collector_endpoint(CollectorId::B), "http://127.0.0.1:8002");
        fs::remove_file(path).unwrap();
    }

    #[rocket::async_test]
    async fn setup_rejects_bad_parameters() {
        let path = temp_config();
        let command_line = [
            PROGRAM_NAME, "setup", "--config", &path, "--candidate", "R", "--candidate", "R",
            "--voters", "3",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 1);

        // Too small a modulus for the roster.
        let command_line = [
            PROGRAM_NAME, "setup", "--config", &path, "--candidate", "R", "--voters", "10",
            "--modulus", "7",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 1);
        assert!(load_config(&path).is_err());
    }

    #[rocket::async_test]
    async fn invalid_ballots_never_leave_the_voter() {
        // This test reaches the collector client, so enable logging.
        log4rs_test_utils::test_logging::init_logging_once_for(
            ["split_tally", "tally_cli"],
            None,
            None,
        );

        let path = temp_config();
        let command_line = [
            PROGRAM_NAME, "setup", "--config", &path, "--candidate", "R", "--voters", "1",
            "--collector-a", "http://127.0.0.1:9", "--collector-b", "http://127.0.0.1:10",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 0);

        // No collector is listening, so reaching one would exit with 1.
        let command_line = [
            PROGRAM_NAME, "vote", "--config", &path, "--voter", "voter-1", "--candidate", "Z",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 2);

        let command_line = [
            PROGRAM_NAME, "vote", "--config", &path, "--voter", "voter-1", "--candidate", "R",
            "--location", "3",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 2);
        fs::remove_file(path).unwrap();
    }

    #[rocket::async_test]
    async fn missing_config_is_an_error() {
        let command_line = [PROGRAM_NAME, "close", "--config", "not a real file"];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(run(&args).await, 1);
    }

    #[test]
    fn bad_cli_usage() {
        // No subcommand.
        cli().try_get_matches_from([PROGRAM_NAME]).unwrap_err();

        // Voting needs a voter and a candidate.
        cli()
            .try_get_matches_from([PROGRAM_NAME, "vote", "--candidate", "R"])
            .unwrap_err();

        // Setup needs a positive roster.
        cli()
            .try_get_matches_from([PROGRAM_NAME, "setup", "--candidate", "R", "--voters", "0"])
            .unwrap_err();

        cli()
            .try_get_matches_from([PROGRAM_NAME, "close", "--attempts", "0"])
            .unwrap_err();
    }
}

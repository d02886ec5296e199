//! Run the masternode compatibility scenario on a simulated network.

use clap::{value_parser, Arg, ArgAction, Command};
use commonware_runtime::{deterministic, Metrics, Runner};
use mncompat_harness::{run, Config};
use mncompat_node::simulated::{self, Network};
use std::{fs, process::ExitCode};
use tracing::{error, info, Level};

fn main() -> ExitCode {
    // Parse arguments
    let matches = Command::new("mncompat")
        .about("Check that masternodes announced across protocol versions converge")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("seed")
                .long("seed")
                .required(false)
                .default_value("0")
                .value_parser(value_parser!(u64))
                .help("Seed of the deterministic runtime"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .required(false)
                .value_parser(value_parser!(String))
                .help("Path to a JSON file overriding the scenario parameters"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Log debug messages"),
        )
        .get_matches();

    // Initialize logging
    let level = if matches.get_flag("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Load configuration
    let cfg = match matches.get_one::<String>("config") {
        Some(path) => {
            let json = match fs::read_to_string(path) {
                Ok(json) => json,
                Err(err) => {
                    error!(%path, ?err, "failed to read config");
                    return ExitCode::FAILURE;
                }
            };
            match Config::from_json(&json) {
                Ok(cfg) => cfg,
                Err(err) => {
                    error!(%path, %err, "failed to parse config");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => Config::default(),
    };
    let seed = matches.get_one::<u64>("seed").copied().unwrap_or_default();
    info!(seed, "running scenario");

    // Run the scenario
    let executor = deterministic::Runner::seeded(seed);
    let result = executor.start(|context| async move {
        let mut network = Network::new(context.with_label("network"), simulated::Config::default());
        run(&context, &mut network, &cfg).await
    });
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            error!(%err, "scenario failed");
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!(?err, "failed to serialize report");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use certa_engine::config::{self, Config, LoggingStyle};
use certa_engine::error::{ConfigError, Error};
use certa_engine::rule::{RuleSet, RulesFile};
use certa_engine::snapshot::CounterSnapshot;
use certa_engine::validate::DeltaValidator;
use certa_engine::verdict::Verdict;
use clap::{App, Arg};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

const EXIT_PASS: i32 = 0;
const EXIT_FAIL: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_INCONCLUSIVE: i32 = 3;

// Counters recorded around a traffic run.
#[derive(Debug, Deserialize)]
struct Snapshots {
    before: CounterSnapshot,
    after: CounterSnapshot,
}

fn init_tracing(config: &config::Logging) {
    // Stdout is reserved for the verdict records.
    let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(config.show_thread_id)
        .with_file(config.show_source)
        .with_line_number(config.show_source)
        .with_ansi(config.colors);
    let layer = match config.style {
        LoggingStyle::Compact => layer.compact().boxed(),
        LoggingStyle::Full => layer.boxed(),
        LoggingStyle::Json => layer.json().boxed(),
        LoggingStyle::Pretty => layer.pretty().boxed(),
    };

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("certa=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer.with_filter(log_level_filter))
        .init();
}

fn load_rules(filename: &str) -> Result<RuleSet, ConfigError> {
    let rules_str = std::fs::read_to_string(filename).map_err(|error| {
        ConfigError::FileRead(filename.to_owned(), error.to_string())
    })?;
    let file = RulesFile::parse(filename, &rules_str)?;
    RuleSet::try_from(file)
}

fn load_snapshots(filename: &str) -> Result<Snapshots, String> {
    let snapshots_str =
        std::fs::read_to_string(filename).map_err(|error| error.to_string())?;
    serde_json::from_str(&snapshots_str).map_err(|error| error.to_string())
}

fn exit_code(verdict: &Verdict) -> i32 {
    if verdict.passed() {
        EXIT_PASS
    } else if verdict.is_inconclusive() {
        EXIT_INCONCLUSIVE
    } else {
        EXIT_FAIL
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Evaluate counter snapshots")
        .about("Re-evaluate recorded counter snapshots against a rules file")
        .arg(
            Arg::with_name("rules")
                .short("r")
                .long("rules")
                .value_name("file")
                .help("Tolerance rules file (TOML)")
                .required(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::with_name("SNAPSHOTS")
                .help("JSON file holding the before and after snapshots")
                .required(true)
                .index(1),
        )
        .get_matches();
    let rules_file = matches.value_of("rules").unwrap();
    let snapshots_file = matches.value_of("SNAPSHOTS").unwrap();

    // Read configuration file.
    let config_file =
        matches.value_of("config").unwrap_or(Config::DFLT_FILEPATH);
    let (config, read_error) = match Config::read(config_file) {
        Ok(config) => (config, None),
        Err(Error::Configuration(ConfigError::FileRead(_, reason))) => {
            (Config::default(), Some(reason))
        }
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    // Initialize tracing.
    init_tracing(&config.logging);
    if let Some(error) = read_error {
        warn!(
            %error,
            file = %config_file,
            "failed to load configuration file, using defaults"
        );
    }

    let rules = match load_rules(rules_file) {
        Ok(rules) => rules,
        Err(error) => {
            Error::Configuration(error).log();
            std::process::exit(EXIT_CONFIG);
        }
    };
    let snapshots = match load_snapshots(snapshots_file) {
        Ok(snapshots) => snapshots,
        Err(error) => {
            error!(%error, file = %snapshots_file, "failed to load snapshots");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let verdict = DeltaValidator::new(&rules)
        .evaluate(&snapshots.before, &snapshots.after);
    match verdict.to_jsonl() {
        Ok(records) => print!("{records}"),
        Err(error) => {
            error!(%error, "failed to serialize verdict");
            std::process::exit(EXIT_FAIL);
        }
    }
    info!(
        passed = %verdict.passed(),
        checks = %verdict.checks().len(),
        faults = %verdict.faults().len(),
        "evaluation finished"
    );

    std::process::exit(exit_code(&verdict));
}

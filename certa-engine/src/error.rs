//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use certa_utils::telemetry::{Path, ValueKind};
use certa_utils::transport::TransportError;
use serde::Serialize;
use tracing::{error, warn, warn_span};

// Engine errors.
#[derive(Clone, Debug)]
#[derive(Serialize)]
pub enum Error {
    // A telemetry or traffic-generator call failed after bounded retries.
    Transport(TransportError),
    // A watch did not reach its expected outcome in time.
    Timeout(Path, Duration),
    // A monotonic counter went backwards between two snapshots.
    CounterReset(CounterReset),
    // A tolerance check could not be decided (e.g. zero transmitted).
    Inconclusive(String),
    // Malformed rule, watch or run specification, or configuration file.
    Configuration(ConfigError),
    // The run was cancelled by an external signal.
    Cancelled,
}

// Counter whose value decreased between the before and after snapshots.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Serialize)]
pub struct CounterReset {
    pub counter: String,
    pub before: u64,
    pub after: u64,
}

// Setup-time validation errors.
#[derive(Clone, Debug, PartialEq)]
#[derive(Serialize)]
pub enum ConfigError {
    WatchZeroTimeout(Path),
    WatchBadPollInterval(Path, Duration, Duration),
    RuleNeedsPair(String),
    RuleNeedsSingle(String),
    RuleNeedsGroup(String, usize),
    RuleEmptyOperand(String),
    RuleBadPercent(String, f64),
    RuleWeightsMismatch(String, usize, usize),
    RuleBadWeight(String, f64),
    RuleUnknownCounter(String, String),
    FlowDuplicateName(String),
    FlowUnknownEndpoint(String, String),
    FlowNoEndpoints(String),
    FlowBadRate(String),
    FlowBadField(String, String),
    RunZeroHold,
    RunNoCounters,
    RunDuplicateCounter(String),
    CounterNotUint(Path, ValueKind),
    FileRead(String, String),
    FileParse(String, String),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::Transport(error) => {
                warn!(%error, "{}", self);
            }
            Error::Timeout(path, timeout) => {
                warn_span!("watch", %path).in_scope(|| {
                    warn!(?timeout, "{}", self);
                });
            }
            Error::CounterReset(reset) => {
                warn!(
                    counter = %reset.counter,
                    before = %reset.before,
                    after = %reset.after,
                    "{}", self
                );
            }
            Error::Inconclusive(reason) => {
                warn!(%reason, "{}", self);
            }
            Error::Configuration(error) => {
                error!(error = %with_source(error), "{}", self);
            }
            Error::Cancelled => {
                warn!("{}", self);
            }
        }
    }

    // Returns whether this error prevents a valid measurement.
    //
    // Timeouts are neutral: the caller's intent decides whether they fail
    // the test.
    pub fn is_fault(&self) -> bool {
        !matches!(self, Error::Timeout(..) | Error::Cancelled)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Transport(..) => {
                write!(f, "transport error")
            }
            Error::Timeout(path, timeout) => {
                write!(f, "watch on {path} timed out after {timeout:?}")
            }
            Error::CounterReset(reset) => {
                write!(
                    f,
                    "counter reset detected on {}: before={} after={}",
                    reset.counter, reset.before, reset.after
                )
            }
            Error::Inconclusive(reason) => {
                write!(f, "inconclusive measurement: {reason}")
            }
            Error::Configuration(..) => {
                write!(f, "configuration error")
            }
            Error::Cancelled => {
                write!(f, "run cancelled")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(error) => Some(error),
            Error::Configuration(error) => Some(error),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Error {
        Error::Transport(error)
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Error {
        Error::Configuration(error)
    }
}

impl From<CounterReset> for Error {
    fn from(reset: CounterReset) -> Error {
        Error::CounterReset(reset)
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::WatchZeroTimeout(path) => {
                write!(f, "watch on {path}: timeout must be positive")
            }
            ConfigError::WatchBadPollInterval(path, interval, timeout) => {
                write!(
                    f,
                    "watch on {path}: poll interval {interval:?} must be \
                     positive and not exceed the timeout {timeout:?}"
                )
            }
            ConfigError::RuleNeedsPair(rule) => {
                write!(f, "rule {rule}: requires a tx/rx counter pair")
            }
            ConfigError::RuleNeedsSingle(rule) => {
                write!(f, "rule {rule}: requires a single counter operand")
            }
            ConfigError::RuleNeedsGroup(rule, members) => {
                write!(
                    f,
                    "rule {rule}: requires at least two group members, \
                     got {members}"
                )
            }
            ConfigError::RuleEmptyOperand(rule) => {
                write!(f, "rule {rule}: counter operand has no counter names")
            }
            ConfigError::RuleBadPercent(rule, value) => {
                write!(f, "rule {rule}: invalid percentage {value}")
            }
            ConfigError::RuleWeightsMismatch(rule, weights, members) => {
                write!(
                    f,
                    "rule {rule}: {weights} weights given for {members} \
                     group members"
                )
            }
            ConfigError::RuleBadWeight(rule, weight) => {
                write!(f, "rule {rule}: weight {weight} must be positive")
            }
            ConfigError::RuleUnknownCounter(rule, counter) => {
                write!(f, "rule {rule}: counter {counter} is not captured")
            }
            ConfigError::FlowDuplicateName(name) => {
                write!(f, "flow {name}: duplicate flow name")
            }
            ConfigError::FlowUnknownEndpoint(name, endpoint) => {
                write!(f, "flow {name}: unknown endpoint {endpoint}")
            }
            ConfigError::FlowNoEndpoints(name) => {
                write!(
                    f,
                    "flow {name}: needs at least one tx and one rx endpoint"
                )
            }
            ConfigError::FlowBadRate(name) => {
                write!(f, "flow {name}: invalid rate")
            }
            ConfigError::FlowBadField(name, field) => {
                write!(
                    f,
                    "flow {name}: invalid value for header field {field}"
                )
            }
            ConfigError::RunZeroHold => {
                write!(f, "traffic hold duration must be positive")
            }
            ConfigError::RunNoCounters => {
                write!(f, "no counters to capture")
            }
            ConfigError::RunDuplicateCounter(name) => {
                write!(f, "counter {name} listed more than once")
            }
            ConfigError::CounterNotUint(path, kind) => {
                write!(f, "counter path {path} has kind {kind}, expected uint")
            }
            ConfigError::FileRead(file, reason) => {
                write!(f, "failed to read {file}: {reason}")
            }
            ConfigError::FileParse(file, reason) => {
                write!(f, "failed to parse {file}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== global functions =====

pub(crate) fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}

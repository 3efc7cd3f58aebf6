//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::future::Future;

use certa_utils::telemetry::{Path, TelemetrySource, ValueKind};
use certa_utils::traffic::TrafficController;
use certa_utils::transport::{Operation, TransportError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::debug::Debug;
use crate::error::{ConfigError, Error};

// Where a counter is read from.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum CounterRef {
    // Per-flow or per-port counter maintained by the traffic generator.
    Tester(String),
    // Unsigned device telemetry leaf (e.g. interface out-unicast-pkts).
    Telemetry(Path),
}

// Named counter values captured at one point in time.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct CounterSnapshot {
    pub label: String,
    pub captured_at: DateTime<Utc>,
    pub values: BTreeMap<String, u64>,
}

// ===== impl CounterRef =====

impl CounterRef {
    pub fn tester(name: impl Into<String>) -> CounterRef {
        CounterRef::Tester(name.into())
    }

    // Name the counter is keyed by in snapshots and rules.
    pub fn name(&self) -> &str {
        match self {
            CounterRef::Tester(name) => name,
            CounterRef::Telemetry(path) => path.name(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CounterRef::Telemetry(path) if path.kind() != ValueKind::Uint => {
                Err(ConfigError::CounterNotUint(path.clone(), path.kind()))
            }
            _ => Ok(()),
        }
    }

    async fn read(
        &self,
        controller: &(impl TrafficController + ?Sized),
        source: &dyn TelemetrySource,
    ) -> Result<u64, TransportError> {
        match self {
            CounterRef::Tester(name) => controller.read_counter(name).await,
            CounterRef::Telemetry(path) => {
                let value = source.get(path).await?;
                value.as_uint().ok_or_else(|| {
                    TransportError::new(
                        Operation::TelemetryGet,
                        format!("counter value is {value}"),
                    )
                    .with_target(path.name())
                })
            }
        }
    }
}

impl std::fmt::Display for CounterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterRef::Tester(name) => write!(f, "tester:{name}"),
            CounterRef::Telemetry(path) => write!(f, "telemetry:{path}"),
        }
    }
}

// ===== impl CounterSnapshot =====

impl CounterSnapshot {
    pub fn new<I, S>(label: impl Into<String>, values: I) -> CounterSnapshot
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        CounterSnapshot {
            label: label.into(),
            captured_at: Utc::now(),
            values: values
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.values.get(name).copied()
    }

    // Reads all counters concurrently.
    //
    // Every read is retried with bounded linear backoff. Counters that still
    // can't be read are left out of the snapshot and reported as errors, so
    // that a single broken counter doesn't hide the others.
    pub async fn capture(
        label: &str,
        counters: &[CounterRef],
        controller: &(impl TrafficController + ?Sized),
        source: &dyn TelemetrySource,
        retry: &config::Retry,
    ) -> (CounterSnapshot, Vec<Error>) {
        let reads = counters.iter().map(|counter| async move {
            let value =
                with_retry(retry, || counter.read(controller, source)).await;
            (counter, value)
        });
        let reads = futures::future::join_all(reads).await;

        let mut values = BTreeMap::new();
        let mut errors = vec![];
        for (counter, value) in reads {
            match value {
                Ok(value) => {
                    values.insert(counter.name().to_owned(), value);
                }
                Err(error) => {
                    let error = Error::Transport(error);
                    error.log();
                    errors.push(error);
                }
            }
        }
        Debug::SnapshotCaptured(label, values.len()).log();

        let snapshot = CounterSnapshot {
            label: label.to_owned(),
            captured_at: Utc::now(),
            values,
        };
        (snapshot, errors)
    }
}

// ===== global functions =====

// Runs the given call, retrying failures with linear backoff.
pub(crate) async fn with_retry<T, F, Fut>(
    retry: &config::Retry,
    mut call: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if attempt > retry.attempts {
                    return Err(error);
                }
                let backoff = retry.backoff(attempt);
                Debug::TransportRetry(&error, attempt, backoff).log();
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

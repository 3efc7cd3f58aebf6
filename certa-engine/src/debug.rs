//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use certa_utils::telemetry::{Path, TypedValue};
use certa_utils::traffic::StartOutcome;
use certa_utils::transport::TransportError;
use tracing::{debug, debug_span};

use crate::run::RunStep;
use crate::verdict::CheckStatus;

// Engine debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Watches
    WatchStart(&'a Path, Duration, Duration),
    WatchSample(&'a Path, u32, &'a TypedValue),
    WatchSatisfied(&'a Path, u32, Duration),
    WatchTimeout(&'a Path, u32, Duration),
    WatchStreamEnded(&'a Path),
    TransportRetry(&'a TransportError, u32, Duration),
    // Traffic runs
    RunStepStart(RunStep),
    ProtocolsStarted(StartOutcome),
    TrafficHold(Duration),
    SnapshotCaptured(&'a str, usize),
    // Evaluation
    CheckEvaluated(&'a str, CheckStatus),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::WatchStart(path, timeout, poll_interval) => {
                debug_span!("watch", %path).in_scope(|| {
                    debug!(?timeout, ?poll_interval, "{}", self);
                });
            }
            Debug::WatchSample(path, sample, value) => {
                debug_span!("watch", %path).in_scope(|| {
                    debug!(%sample, %value, "{}", self);
                });
            }
            Debug::WatchSatisfied(path, samples, elapsed)
            | Debug::WatchTimeout(path, samples, elapsed) => {
                debug_span!("watch", %path).in_scope(|| {
                    debug!(%samples, ?elapsed, "{}", self);
                });
            }
            Debug::WatchStreamEnded(path) => {
                debug_span!("watch", %path).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::TransportRetry(error, attempt, backoff) => {
                debug!(%error, %attempt, ?backoff, "{}", self);
            }
            Debug::RunStepStart(step) => {
                debug_span!("run").in_scope(|| {
                    debug!(%step, "{}", self);
                });
            }
            Debug::ProtocolsStarted(outcome) => {
                debug_span!("run").in_scope(|| {
                    debug!(?outcome, "{}", self);
                });
            }
            Debug::TrafficHold(hold) => {
                debug_span!("run").in_scope(|| {
                    debug!(?hold, "{}", self);
                });
            }
            Debug::SnapshotCaptured(label, counters) => {
                debug_span!("run").in_scope(|| {
                    debug!(%label, %counters, "{}", self);
                });
            }
            Debug::CheckEvaluated(description, status) => {
                debug!(%description, ?status, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::WatchStart(..) => {
                write!(f, "watch started")
            }
            Debug::WatchSample(..) => {
                write!(f, "sample received")
            }
            Debug::WatchSatisfied(..) => {
                write!(f, "predicate satisfied")
            }
            Debug::WatchTimeout(..) => {
                write!(f, "watch timed out")
            }
            Debug::WatchStreamEnded(..) => {
                write!(f, "subscription ended, falling back to polling")
            }
            Debug::TransportRetry(..) => {
                write!(f, "retrying failed call")
            }
            Debug::RunStepStart(..) => {
                write!(f, "starting step")
            }
            Debug::ProtocolsStarted(..) => {
                write!(f, "protocols started")
            }
            Debug::TrafficHold(..) => {
                write!(f, "traffic started, holding")
            }
            Debug::SnapshotCaptured(..) => {
                write!(f, "counter snapshot captured")
            }
            Debug::CheckEvaluated(..) => {
                write!(f, "check evaluated")
            }
        }
    }
}

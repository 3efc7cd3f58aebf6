//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// Capability call that crossed the engine boundary.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    TelemetryGet,
    TelemetrySubscribe,
    PushFlows,
    StartProtocols,
    StopProtocols,
    StartTraffic,
    StopTraffic,
    ReadCounter,
}

// Failure reported by a telemetry or traffic-generator adapter.
//
// Adapters wrap their client-specific errors into this type so that the
// engine can retry, record and serialize them without knowing anything
// about gNMI or the traffic generator API.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TransportError {
    pub operation: Operation,
    pub target: Option<String>,
    pub reason: String,
}

// ===== impl Operation =====

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::TelemetryGet => write!(f, "telemetry get"),
            Operation::TelemetrySubscribe => write!(f, "telemetry subscribe"),
            Operation::PushFlows => write!(f, "push flows"),
            Operation::StartProtocols => write!(f, "start protocols"),
            Operation::StopProtocols => write!(f, "stop protocols"),
            Operation::StartTraffic => write!(f, "start traffic"),
            Operation::StopTraffic => write!(f, "stop traffic"),
            Operation::ReadCounter => write!(f, "read counter"),
        }
    }
}

// ===== impl TransportError =====

impl TransportError {
    pub fn new(operation: Operation, reason: impl std::fmt::Display) -> Self {
        TransportError {
            operation,
            target: None,
            reason: reason.to_string(),
        }
    }

    // Attaches the path or counter name the failed call referred to.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(
                f,
                "{} failed for {}: {}",
                self.operation, target, self.reason
            ),
            None => write!(f, "{} failed: {}", self.operation, self.reason),
        }
    }
}

impl std::error::Error for TransportError {}

//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

// Traffic flow definition pushed to the traffic generator.
//
// A flow is immutable once pushed; changing a flow means pushing a new flow
// set.
#[derive(Clone, Debug, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct FlowSpec {
    // Unique within a topology.
    pub name: String,
    pub endpoints: Endpoints,
    pub size_bytes: u32,
    pub rate: Rate,
    pub duration: FlowDuration,
    #[new(default)]
    pub headers: Vec<HeaderLayer>,
}

// Ordered transmit and receive endpoint names.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct Endpoints {
    pub tx: Vec<String>,
    pub rx: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rate {
    Pps(u64),
    Percent(f64),
    Mbps(u64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowDuration {
    // Run until the given number of packets was transmitted.
    FixedPackets(u64),
    // Run for the given time.
    FixedTime(Duration),
    // Run until explicitly stopped.
    Continuous,
}

// One protocol layer of a flow's header stack.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct HeaderLayer {
    pub protocol: String,
    #[new(default)]
    pub fields: Vec<HeaderField>,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct HeaderField {
    pub name: String,
    pub value: FieldValue,
}

// Header field value. Ranges and sets describe multi-value traffic.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldValue {
    Exact(String),
    Range { low: u64, high: u64, step: u64 },
    Set(Vec<String>),
}

// Names of the tester endpoints (ports, devices, interfaces) flows may
// reference.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Topology {
    pub endpoints: BTreeSet<String>,
}

// Outcome of a start request for an idempotent operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

// Traffic generator driving flows and emulated protocol peers.
#[async_trait]
pub trait TrafficController: Send + Sync {
    // Replaces the active flow set.
    async fn push_flows(&self, flows: &[FlowSpec])
    -> Result<(), TransportError>;

    // Starts emulated protocols. Starting protocols that are already
    // running is reported through `StartOutcome::AlreadyRunning`.
    async fn start_protocols(&self) -> Result<StartOutcome, TransportError>;

    async fn stop_protocols(&self) -> Result<(), TransportError>;

    async fn start_traffic(&self) -> Result<(), TransportError>;

    async fn stop_traffic(&self) -> Result<(), TransportError>;

    // Reads a per-flow or per-port counter.
    async fn read_counter(&self, name: &str) -> Result<u64, TransportError>;
}

// ===== impl FlowSpec =====

impl FlowSpec {
    // Returns the transmit and receive endpoint names, in order.
    pub fn endpoint_names(&self) -> impl Iterator<Item = &str> {
        self.endpoints
            .tx
            .iter()
            .chain(self.endpoints.rx.iter())
            .map(String::as_str)
    }

    pub fn with_header(mut self, header: HeaderLayer) -> Self {
        self.headers.push(header);
        self
    }
}

// ===== impl HeaderLayer =====

impl HeaderLayer {
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        value: FieldValue,
    ) -> Self {
        self.fields.push(HeaderField::new(name.into(), value));
        self
    }
}

// ===== impl FieldValue =====

impl FieldValue {
    // Returns the number of distinct values this field generates, or `None`
    // when the value is malformed (empty set, inverted range, zero step).
    pub fn cardinality(&self) -> Option<u64> {
        match self {
            FieldValue::Exact(..) => Some(1),
            FieldValue::Range { low, high, step } => {
                if low > high || *step == 0 {
                    return None;
                }
                Some(((high - low) / step).saturating_add(1))
            }
            FieldValue::Set(values) => {
                (!values.is_empty()).then_some(values.len() as u64)
            }
        }
    }
}

// ===== impl Topology =====

impl Topology {
    pub fn new<I, S>(endpoints: I) -> Topology
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Topology {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints.contains(endpoint)
    }
}

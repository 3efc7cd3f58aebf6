//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use certa_utils::traffic::{FlowSpec, StartOutcome, TrafficController};
use certa_utils::transport::{Operation, TransportError};

// Call received by the traffic generator stub.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    PushFlows(Vec<String>),
    StartProtocols,
    StopProtocols,
    StartTraffic,
    StopTraffic,
    ReadCounter(String),
}

// In-memory traffic generator.
//
// Counters hold their configured values until traffic stops, at which point
// the values registered with `on_traffic` take effect.
#[derive(Debug, Default)]
pub struct TrafficStub {
    state: Mutex<TrafficState>,
}

#[derive(Debug, Default)]
struct TrafficState {
    calls: Vec<Call>,
    protocols_running: bool,
    traffic_running: bool,
    counters: BTreeMap<String, u64>,
    after_traffic: BTreeMap<String, u64>,
    failures: HashMap<Operation, u32>,
}

// ===== impl TrafficStub =====

impl TrafficStub {
    pub fn new() -> TrafficStub {
        TrafficStub::default()
    }

    // Protocols are already running before the first start request.
    pub fn with_protocols_running(self) -> TrafficStub {
        self.state.lock().unwrap().protocols_running = true;
        self
    }

    pub fn set_counter(&self, name: &str, value: u64) {
        let mut state = self.state.lock().unwrap();
        state.counters.insert(name.to_owned(), value);
    }

    // Value the counter takes once traffic stops.
    pub fn on_traffic(&self, name: &str, value: u64) {
        let mut state = self.state.lock().unwrap();
        state.after_traffic.insert(name.to_owned(), value);
    }

    // The next `times` calls of the given operation fail.
    pub fn fail(&self, operation: Operation, times: u32) {
        let mut state = self.state.lock().unwrap();
        *state.failures.entry(operation).or_default() += times;
    }

    // Drains the calls received so far.
    pub fn calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state.lock().unwrap().calls)
    }

    pub fn traffic_running(&self) -> bool {
        self.state.lock().unwrap().traffic_running
    }

    pub fn protocols_running(&self) -> bool {
        self.state.lock().unwrap().protocols_running
    }

    fn call(
        &self,
        call: Call,
        operation: Operation,
    ) -> Result<std::sync::MutexGuard<'_, TrafficState>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(failures) = state.failures.get_mut(&operation) {
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::new(operation, "injected failure"));
            }
        }
        Ok(state)
    }
}

#[async_trait]
impl TrafficController for TrafficStub {
    async fn push_flows(
        &self,
        flows: &[FlowSpec],
    ) -> Result<(), TransportError> {
        let names = flows.iter().map(|flow| flow.name.clone()).collect();
        drop(self.call(Call::PushFlows(names), Operation::PushFlows)?);
        Ok(())
    }

    async fn start_protocols(&self) -> Result<StartOutcome, TransportError> {
        let mut state =
            self.call(Call::StartProtocols, Operation::StartProtocols)?;
        if state.protocols_running {
            return Ok(StartOutcome::AlreadyRunning);
        }
        state.protocols_running = true;
        Ok(StartOutcome::Started)
    }

    async fn stop_protocols(&self) -> Result<(), TransportError> {
        let mut state =
            self.call(Call::StopProtocols, Operation::StopProtocols)?;
        state.protocols_running = false;
        Ok(())
    }

    async fn start_traffic(&self) -> Result<(), TransportError> {
        let mut state = self.call(Call::StartTraffic, Operation::StartTraffic)?;
        state.traffic_running = true;
        Ok(())
    }

    async fn stop_traffic(&self) -> Result<(), TransportError> {
        let mut state = self.call(Call::StopTraffic, Operation::StopTraffic)?;
        if state.traffic_running {
            state.traffic_running = false;
            let after_traffic = std::mem::take(&mut state.after_traffic);
            state.counters.extend(after_traffic);
        }
        Ok(())
    }

    async fn read_counter(&self, name: &str) -> Result<u64, TransportError> {
        let call = Call::ReadCounter(name.to_owned());
        let state = self.call(call, Operation::ReadCounter)?;
        state.counters.get(name).copied().ok_or_else(|| {
            TransportError::new(Operation::ReadCounter, "unknown counter")
                .with_target(name)
        })
    }
}

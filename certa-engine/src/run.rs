//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use certa_utils::cancel::CancelToken;
use certa_utils::telemetry::TelemetrySource;
use certa_utils::traffic::{
    FlowSpec, Rate, StartOutcome, Topology, TrafficController,
};
use certa_utils::transport::TransportError;
use derive_new::new;
use serde::Serialize;
use tracing::{Instrument, debug_span, warn};

use crate::config::Config;
use crate::debug::Debug;
use crate::delta::Delta;
use crate::error::{ConfigError, Error};
use crate::snapshot::{CounterRef, CounterSnapshot, with_retry};
use crate::watch::{self, WatchResult, WatchSpec};

// Bounded traffic experiment.
#[derive(Clone, Debug, new)]
pub struct RunSpec {
    // Identifies the run in logs and recorded verdicts.
    pub label: String,
    pub flows: Vec<FlowSpec>,
    // Counters captured before and after traffic.
    pub counters: Vec<CounterRef>,
    pub hold: Duration,
    // Endpoints the flows may reference. Unchecked when unset.
    #[new(default)]
    pub topology: Option<Topology>,
    // Must be met before traffic is injected.
    #[new(default)]
    pub convergence: Vec<WatchSpec>,
    // Evaluated after traffic stopped, before the after snapshot.
    #[new(default)]
    pub settle: Vec<WatchSpec>,
    // Overrides `run.strict` from the configuration.
    #[new(default)]
    pub strict: Option<bool>,
    // Overrides `run.stop_protocols` from the configuration.
    #[new(default)]
    pub stop_protocols: Option<bool>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStep {
    PushFlows,
    StartProtocols,
    Converge,
    CaptureBefore,
    Traffic,
    Settle,
    CaptureAfter,
    StopProtocols,
}

// Everything a run produced, including partial results of aborted runs.
#[derive(Debug, Default)]
pub struct RunReport {
    pub before: Option<CounterSnapshot>,
    pub after: Option<CounterSnapshot>,
    pub protocols: Option<StartOutcome>,
    pub convergence: Vec<WatchResult>,
    pub settle: Vec<WatchResult>,
    pub errors: Vec<Error>,
    // Protocol teardown failure. Doesn't affect the measurement.
    pub teardown_error: Option<Error>,
    // Step that ended the run early.
    pub aborted_at: Option<RunStep>,
    pub cancelled: bool,
}

// Drives one run against a traffic generator.
//
// The controller is borrowed mutably for the lifetime of the run: pushing
// flows replaces the generator's flow set, so runs against the same
// controller must never overlap.
pub struct TrafficRun<'a, C: ?Sized> {
    controller: &'a mut C,
    source: Arc<dyn TelemetrySource>,
    config: &'a Config,
}

#[derive(Debug)]
enum Abort {
    Failed(RunStep),
    Cancelled(RunStep),
}

// ===== impl RunSpec =====

impl RunSpec {
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn with_convergence(mut self, watches: Vec<WatchSpec>) -> Self {
        self.convergence = watches;
        self
    }

    pub fn with_settle(mut self, watches: Vec<WatchSpec>) -> Self {
        self.settle = watches;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    pub fn with_stop_protocols(mut self, stop_protocols: bool) -> Self {
        self.stop_protocols = Some(stop_protocols);
        self
    }

    pub fn counter(&self, name: &str) -> Option<&CounterRef> {
        self.counters.iter().find(|counter| counter.name() == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hold.is_zero() {
            return Err(ConfigError::RunZeroHold);
        }
        if self.counters.is_empty() {
            return Err(ConfigError::RunNoCounters);
        }
        let mut names = HashSet::new();
        for counter in &self.counters {
            counter.validate()?;
            if !names.insert(counter.name()) {
                let name = counter.name().to_owned();
                return Err(ConfigError::RunDuplicateCounter(name));
            }
        }
        validate_flows(&self.flows, self.topology.as_ref())?;
        for watch in self.convergence.iter().chain(&self.settle) {
            watch.validate()?;
        }
        Ok(())
    }
}

// ===== impl RunStep =====

impl std::fmt::Display for RunStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStep::PushFlows => write!(f, "push-flows"),
            RunStep::StartProtocols => write!(f, "start-protocols"),
            RunStep::Converge => write!(f, "converge"),
            RunStep::CaptureBefore => write!(f, "capture-before"),
            RunStep::Traffic => write!(f, "traffic"),
            RunStep::Settle => write!(f, "settle"),
            RunStep::CaptureAfter => write!(f, "capture-after"),
            RunStep::StopProtocols => write!(f, "stop-protocols"),
        }
    }
}

// ===== impl RunReport =====

impl RunReport {
    // Returns whether every step ran.
    pub fn completed(&self) -> bool {
        self.aborted_at.is_none()
    }
}

// ===== impl TrafficRun =====

impl<'a, C> TrafficRun<'a, C>
where
    C: TrafficController + ?Sized,
{
    pub fn new(
        controller: &'a mut C,
        source: Arc<dyn TelemetrySource>,
        config: &'a Config,
    ) -> Self {
        TrafficRun {
            controller,
            source,
            config,
        }
    }

    // Executes the run.
    //
    // Only a malformed spec is returned as an error, before any device is
    // touched. Everything that goes wrong afterwards is collected in the
    // report, together with whatever was measured up to that point.
    pub async fn run(
        &mut self,
        spec: &RunSpec,
        cancel: &CancelToken,
    ) -> Result<RunReport, Error> {
        spec.validate()?;
        Ok(self.run_validated(spec, cancel).await)
    }

    pub(crate) async fn run_validated(
        &mut self,
        spec: &RunSpec,
        cancel: &CancelToken,
    ) -> RunReport {
        let mut report = RunReport::default();
        let span = debug_span!("traffic-run", label = %spec.label);

        match self.execute(spec, cancel, &mut report).instrument(span).await {
            Ok(()) => (),
            Err(Abort::Failed(step)) => {
                warn!(label = %spec.label, %step, "run aborted");
                report.aborted_at = Some(step);
            }
            Err(Abort::Cancelled(step)) => {
                let error = Error::Cancelled;
                error.log();
                report.errors.push(error);
                report.aborted_at = Some(step);
                report.cancelled = true;
            }
        }

        report
    }

    async fn execute(
        &mut self,
        spec: &RunSpec,
        cancel: &CancelToken,
        report: &mut RunReport,
    ) -> Result<(), Abort> {
        let config = self.config;
        let retry = &config.retry;
        let controller = &*self.controller;

        // Replaces the flows of any previous run.
        Debug::RunStepStart(RunStep::PushFlows).log();
        let pushed = with_retry(retry, || controller.push_flows(&spec.flows));
        let pushed = or_cancel(cancel, pushed).await;
        step_result(RunStep::PushFlows, pushed, report)?;

        Debug::RunStepStart(RunStep::StartProtocols).log();
        let started = with_retry(retry, || controller.start_protocols());
        let started = or_cancel(cancel, started).await;
        let outcome = step_result(RunStep::StartProtocols, started, report)?;
        Debug::ProtocolsStarted(outcome).log();
        report.protocols = Some(outcome);

        // Traffic never starts before the convergence watches resolved.
        Debug::RunStepStart(RunStep::Converge).log();
        report.convergence = watch::watch_all_validated(
            self.source.clone(),
            &spec.convergence,
            config,
            cancel,
        )
        .await;
        if cancel.is_cancelled() {
            return Err(Abort::Cancelled(RunStep::Converge));
        }
        let converged = record_unmet(
            &spec.convergence,
            &report.convergence,
            &mut report.errors,
        );
        if !converged && spec.strict.unwrap_or(config.run.strict) {
            warn!(
                label = %spec.label,
                "convergence incomplete, not injecting traffic"
            );
            return Err(Abort::Failed(RunStep::Converge));
        }

        Debug::RunStepStart(RunStep::CaptureBefore).log();
        let before = self.capture("before", spec);
        let (before, errors) = or_cancel(cancel, before)
            .await
            .ok_or(Abort::Cancelled(RunStep::CaptureBefore))?;
        report.before = Some(before);
        report.errors.extend(errors);

        Debug::RunStepStart(RunStep::Traffic).log();
        self.traffic(spec.hold, cancel, report).await?;

        if !spec.settle.is_empty() {
            Debug::RunStepStart(RunStep::Settle).log();
            report.settle = watch::watch_all_validated(
                self.source.clone(),
                &spec.settle,
                config,
                cancel,
            )
            .await;
            if cancel.is_cancelled() {
                return Err(Abort::Cancelled(RunStep::Settle));
            }
            record_unmet(&spec.settle, &report.settle, &mut report.errors);
        }

        Debug::RunStepStart(RunStep::CaptureAfter).log();
        let after = self.capture("after", spec);
        let (after, errors) = or_cancel(cancel, after)
            .await
            .ok_or(Abort::Cancelled(RunStep::CaptureAfter))?;
        report.errors.extend(errors);
        if let Some(before) = &report.before {
            for reset in Delta::compute(before, &after).resets() {
                let error = Error::CounterReset(reset.clone());
                error.log();
                report.errors.push(error);
            }
        }
        report.after = Some(after);

        if spec.stop_protocols.unwrap_or(config.run.stop_protocols) {
            Debug::RunStepStart(RunStep::StopProtocols).log();
            let stopped =
                with_retry(retry, || controller.stop_protocols()).await;
            if let Err(error) = stopped {
                let error = Error::Transport(error);
                error.log();
                report.teardown_error = Some(error);
            }
        }

        Ok(())
    }

    // Starts traffic, holds it and stops it again.
    //
    // Traffic is stopped whenever it might have started, including when the
    // hold is cut short by a cancellation.
    async fn traffic(
        &self,
        hold: Duration,
        cancel: &CancelToken,
        report: &mut RunReport,
    ) -> Result<(), Abort> {
        let controller = &*self.controller;

        let started = or_cancel(cancel, controller.start_traffic()).await;
        let started = match started {
            Some(Ok(())) => true,
            Some(Err(error)) => {
                let error = Error::Transport(error);
                error.log();
                report.errors.push(error);
                false
            }
            None => false,
        };

        let held = started && {
            Debug::TrafficHold(hold).log();
            or_cancel(cancel, tokio::time::sleep(hold)).await.is_some()
        };

        let retry = &self.config.retry;
        let stopped = with_retry(retry, || controller.stop_traffic()).await;
        let stopped = match stopped {
            Ok(()) => true,
            Err(error) => {
                let error = Error::Transport(error);
                error.log();
                report.errors.push(error);
                false
            }
        };

        if started && held && stopped {
            Ok(())
        } else if cancel.is_cancelled() {
            Err(Abort::Cancelled(RunStep::Traffic))
        } else {
            Err(Abort::Failed(RunStep::Traffic))
        }
    }

    async fn capture(
        &self,
        label: &str,
        spec: &RunSpec,
    ) -> (CounterSnapshot, Vec<Error>) {
        CounterSnapshot::capture(
            label,
            &spec.counters,
            &*self.controller,
            self.source.as_ref(),
            &self.config.retry,
        )
        .await
    }
}

// ===== helper functions =====

async fn or_cancel<F>(cancel: &CancelToken, future: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

fn step_result<T>(
    step: RunStep,
    result: Option<Result<T, TransportError>>,
    report: &mut RunReport,
) -> Result<T, Abort> {
    match result {
        Some(Ok(value)) => Ok(value),
        Some(Err(error)) => {
            let error = Error::Transport(error);
            error.log();
            report.errors.push(error);
            Err(Abort::Failed(step))
        }
        None => Err(Abort::Cancelled(step)),
    }
}

// Records a timeout for every watch that ran out of time without meeting
// its intent. Returns whether all watches met their intent.
fn record_unmet(
    specs: &[WatchSpec],
    results: &[WatchResult],
    errors: &mut Vec<Error>,
) -> bool {
    let mut met = true;
    for (spec, result) in specs.iter().zip(results) {
        if result.meets(spec.intent) {
            continue;
        }
        met = false;
        if !result.satisfied && result.error.is_none() {
            let error = Error::Timeout(spec.path.clone(), spec.timeout);
            error.log();
            errors.push(error);
        }
    }
    met
}

fn validate_flows(
    flows: &[FlowSpec],
    topology: Option<&Topology>,
) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for flow in flows {
        if !names.insert(flow.name.as_str()) {
            return Err(ConfigError::FlowDuplicateName(flow.name.clone()));
        }
        if flow.endpoints.tx.is_empty() || flow.endpoints.rx.is_empty() {
            return Err(ConfigError::FlowNoEndpoints(flow.name.clone()));
        }
        if let Some(topology) = topology {
            let unknown = flow
                .endpoint_names()
                .find(|endpoint| !topology.contains(endpoint));
            if let Some(endpoint) = unknown {
                return Err(ConfigError::FlowUnknownEndpoint(
                    flow.name.clone(),
                    endpoint.to_owned(),
                ));
            }
        }

        let valid_rate = match flow.rate {
            Rate::Pps(pps) => pps > 0,
            Rate::Mbps(mbps) => mbps > 0,
            Rate::Percent(pct) => pct > 0.0 && pct <= 100.0,
        };
        if !valid_rate {
            return Err(ConfigError::FlowBadRate(flow.name.clone()));
        }

        for header in &flow.headers {
            for field in &header.fields {
                if field.value.cardinality().is_none() {
                    return Err(ConfigError::FlowBadField(
                        flow.name.clone(),
                        format!("{}.{}", header.protocol, field.name),
                    ));
                }
            }
        }
    }
    Ok(())
}

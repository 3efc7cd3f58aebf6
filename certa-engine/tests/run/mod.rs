//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use certa_engine::config::Config;
use certa_engine::error::{ConfigError, Error};
use certa_engine::run::{RunSpec, RunStep, TrafficRun};
use certa_engine::snapshot::CounterRef;
use certa_engine::test::setup;
use certa_engine::test::stub::{Call, TelemetryStub, TrafficStub};
use certa_engine::watch::{Predicate, WatchSpec};
use certa_utils::cancel::{CancelHandle, CancelToken};
use certa_utils::telemetry::{Path, TypedValue, Value, ValueKind};
use certa_utils::traffic::{
    Endpoints, FlowDuration, FlowSpec, Rate, StartOutcome, Topology,
};
use certa_utils::transport::Operation;
use maplit::btreemap;
use tokio::time::Instant;

const HOLD: Duration = Duration::from_secs(30);

fn session_state() -> Path {
    Path::new(
        "/network-instances/network-instance[name=DEFAULT]/protocols/\
         protocol[identifier=BGP][name=BGP]/bgp/neighbors/\
         neighbor[neighbor-address=192.0.2.2]/state/session-state",
        ValueKind::Enum,
    )
}

fn out_pkts() -> Path {
    Path::new(
        "/interfaces/interface[name=port2]/state/counters/out-unicast-pkts",
        ValueKind::Uint,
    )
}

fn tx_rate() -> Path {
    Path::new("/tester/flows/flow[name=flow1]/state/tx-rate", ValueKind::Uint)
}

fn flows() -> Vec<FlowSpec> {
    vec![FlowSpec::new(
        "flow1".to_owned(),
        Endpoints::new(vec!["port1".to_owned()], vec!["port2".to_owned()]),
        512,
        Rate::Pps(1000),
        FlowDuration::Continuous,
    )]
}

fn spec() -> RunSpec {
    let convergence = WatchSpec::new(
        session_state(),
        Predicate::equals(Value::Enum("ESTABLISHED".to_owned())),
        Duration::from_secs(10),
    );
    RunSpec::new(
        "ipv4-flow".to_owned(),
        flows(),
        vec![CounterRef::tester("flow1.tx"), CounterRef::tester("flow1.rx")],
        HOLD,
    )
    .with_topology(Topology::new(["port1", "port2"]))
    .with_convergence(vec![convergence])
}

// Session comes up after three seconds; every transmitted packet arrives.
fn testbed() -> (TrafficStub, Arc<TelemetryStub>) {
    let traffic = TrafficStub::new();
    traffic.set_counter("flow1.tx", 0);
    traffic.set_counter("flow1.rx", 0);
    traffic.on_traffic("flow1.tx", 30_000);
    traffic.on_traffic("flow1.rx", 30_000);

    let telemetry = TelemetryStub::new();
    let session = session_state();
    let established = Value::Enum("ESTABLISHED".to_owned());
    telemetry.set_at(
        &session,
        Duration::from_secs(3),
        TypedValue::present(established),
    );

    (traffic, Arc::new(telemetry))
}

// Calls other than counter reads, in order.
fn control_calls(traffic: &TrafficStub) -> Vec<Call> {
    traffic
        .calls()
        .into_iter()
        .filter(|call| !matches!(call, Call::ReadCounter(_)))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn complete_run() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();

    let start = Instant::now();
    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    assert!(!report.cancelled);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.protocols, Some(StartOutcome::Started));
    assert!(report.convergence[0].satisfied);

    let before = report.before.unwrap();
    let after = report.after.unwrap();
    assert_eq!(before.label, "before");
    assert_eq!(
        before.values,
        btreemap! {
            "flow1.rx".to_owned() => 0,
            "flow1.tx".to_owned() => 0,
        }
    );
    assert_eq!(
        after.values,
        btreemap! {
            "flow1.rx".to_owned() => 30_000,
            "flow1.tx".to_owned() => 30_000,
        }
    );

    // Convergence (3s) followed by the traffic hold.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(33), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(34), "{elapsed:?}");

    assert_eq!(
        control_calls(&traffic),
        vec![
            Call::PushFlows(vec!["flow1".to_owned()]),
            Call::StartProtocols,
            Call::StartTraffic,
            Call::StopTraffic,
        ]
    );
    assert!(!traffic.traffic_running());
}

#[tokio::test(start_paused = true)]
async fn partial_convergence_still_injects_traffic() {
    setup();
    let config = Config::default();
    let (mut traffic, _) = testbed();
    let telemetry = Arc::new(TelemetryStub::new());

    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    assert!(!report.convergence[0].satisfied);
    assert!(matches!(
        report.errors.as_slice(),
        [Error::Timeout(path, timeout)]
            if *path == session_state() && *timeout == Duration::from_secs(10)
    ));
    assert!(control_calls(&traffic).contains(&Call::StartTraffic));
    assert!(report.after.is_some());
}

#[tokio::test(start_paused = true)]
async fn strict_run_aborts_before_traffic() {
    setup();
    let config = Config::default();
    let (mut traffic, _) = testbed();
    let telemetry = Arc::new(TelemetryStub::new());

    let spec = spec().with_strict(true);
    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec, &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(report.aborted_at, Some(RunStep::Converge));
    assert!(!report.cancelled);
    assert!(report.before.is_none());
    assert!(report.after.is_none());
    assert_eq!(
        control_calls(&traffic),
        vec![
            Call::PushFlows(vec!["flow1".to_owned()]),
            Call::StartProtocols,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn strict_mode_from_config() {
    setup();
    let mut config = Config::default();
    config.run.strict = true;
    let (mut traffic, _) = testbed();
    let telemetry = Arc::new(TelemetryStub::new());

    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(report.aborted_at, Some(RunStep::Converge));

    // The run spec takes precedence over the configuration.
    let (mut traffic, _) = testbed();
    let telemetry = Arc::new(TelemetryStub::new());
    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec().with_strict(false), &CancelToken::never())
        .await
        .unwrap();
    assert!(report.completed());
}

#[tokio::test(start_paused = true)]
async fn protocols_already_running() {
    setup();
    let config = Config::default();
    let (traffic, telemetry) = testbed();
    let mut traffic = traffic.with_protocols_running();

    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    assert_eq!(report.protocols, Some(StartOutcome::AlreadyRunning));
    assert!(report.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_traffic_failure_aborts() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();
    traffic.fail(Operation::StartTraffic, 1);

    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(report.aborted_at, Some(RunStep::Traffic));
    assert!(report.before.is_some());
    assert!(report.after.is_none());
    assert!(matches!(
        report.errors.as_slice(),
        [Error::Transport(error)] if error.operation == Operation::StartTraffic
    ));
    // Start isn't retried; stop is issued regardless.
    let calls = control_calls(&traffic);
    assert_eq!(
        calls.iter().filter(|call| **call == Call::StartTraffic).count(),
        1
    );
    assert_eq!(calls.last(), Some(&Call::StopTraffic));
}

#[tokio::test(start_paused = true)]
async fn transient_push_failure_is_retried() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();
    traffic.fail(Operation::PushFlows, 2);

    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    let pushes = control_calls(&traffic)
        .into_iter()
        .filter(|call| matches!(call, Call::PushFlows(_)))
        .count();
    assert_eq!(pushes, 3);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_hold_stops_traffic() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();
    let (handle, cancel) = CancelHandle::new();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.cancel();
    });

    let start = Instant::now();
    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.aborted_at, Some(RunStep::Traffic));
    assert!(report.before.is_some());
    assert!(report.after.is_none());
    assert!(matches!(report.errors.as_slice(), [Error::Cancelled]));
    assert!(start.elapsed() < HOLD);
    assert_eq!(control_calls(&traffic).last(), Some(&Call::StopTraffic));
    assert!(!traffic.traffic_running());
}

#[tokio::test(start_paused = true)]
async fn deadline_during_convergence() {
    setup();
    let config = Config::default();
    let (mut traffic, _) = testbed();
    let telemetry = Arc::new(TelemetryStub::new());
    let cancel = CancelToken::at(Instant::now() + Duration::from_secs(4));

    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.aborted_at, Some(RunStep::Converge));
    assert!(report.convergence[0].cancelled);
    assert!(!control_calls(&traffic).contains(&Call::StartTraffic));
}

#[tokio::test(start_paused = true)]
async fn configuration_errors_touch_nothing() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();

    let spec = spec().with_topology(Topology::new(["port1", "port3"]));
    let error = TrafficRun::new(&mut traffic, telemetry.clone(), &config)
        .run(&spec, &CancelToken::never())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        Error::Configuration(ConfigError::FlowUnknownEndpoint(flow, endpoint))
            if flow == "flow1" && endpoint == "port2"
    ));
    assert!(traffic.calls().is_empty());
    assert_eq!(telemetry.reads(&session_state()), 0);
}

#[tokio::test(start_paused = true)]
async fn counter_reset_is_flagged() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();
    traffic.set_counter("flow1.rx", 500);
    traffic.on_traffic("flow1.rx", 400);

    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec(), &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    assert!(matches!(
        report.errors.as_slice(),
        [Error::CounterReset(reset)]
            if reset.counter == "flow1.rx"
                && reset.before == 500
                && reset.after == 400
    ));
}

#[tokio::test(start_paused = true)]
async fn telemetry_counters() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();
    telemetry.set_at(
        &out_pkts(),
        Duration::ZERO,
        TypedValue::present(Value::Uint(100)),
    );
    telemetry.set_at(
        &out_pkts(),
        Duration::from_secs(20),
        TypedValue::present(Value::Uint(30_100)),
    );
    let missing = Path::new(
        "/interfaces/interface[name=port3]/state/counters/out-unicast-pkts",
        ValueKind::Uint,
    );

    let mut spec = spec();
    spec.counters.push(CounterRef::Telemetry(out_pkts()));
    spec.counters.push(CounterRef::Telemetry(missing.clone()));
    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec, &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    let before = report.before.unwrap();
    let after = report.after.unwrap();
    assert_eq!(before.get(out_pkts().name()), Some(100));
    assert_eq!(after.get(out_pkts().name()), Some(30_100));
    // Absent counters are left out and reported.
    assert_eq!(before.get(missing.name()), None);
    assert_eq!(report.errors.len(), 2);
    let missing = Some(missing.name());
    assert!(report.errors.iter().all(|error| matches!(
        error,
        Error::Transport(error) if error.target.as_deref() == missing
    )));
}

#[tokio::test(start_paused = true)]
async fn settle_watches() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();
    telemetry.set_at(
        &tx_rate(),
        Duration::ZERO,
        TypedValue::present(Value::Uint(1000)),
    );
    telemetry.set_at(
        &tx_rate(),
        Duration::from_secs(35),
        TypedValue::present(Value::Uint(0)),
    );

    let settle = WatchSpec::new(
        tx_rate(),
        Predicate::equals(Value::Uint(0)),
        Duration::from_secs(10),
    );
    let spec = spec().with_settle(vec![settle]);
    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec, &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    assert!(report.settle[0].satisfied);
    assert!(report.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unmet_settle_watch_does_not_abort() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();
    telemetry.set(&tx_rate(), Value::Uint(1000));

    let settle = WatchSpec::new(
        tx_rate(),
        Predicate::equals(Value::Uint(0)),
        Duration::from_secs(5),
    );
    let spec = spec().with_settle(vec![settle]);
    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec, &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    assert!(!report.settle[0].satisfied);
    assert!(report.after.is_some());
    assert!(matches!(report.errors.as_slice(), [Error::Timeout(..)]));
}

#[tokio::test(start_paused = true)]
async fn protocol_teardown_failure_is_recorded() {
    setup();
    let config = Config::default();
    let (mut traffic, telemetry) = testbed();
    traffic.fail(Operation::StopProtocols, 10);

    let spec = spec().with_stop_protocols(true);
    let report = TrafficRun::new(&mut traffic, telemetry, &config)
        .run(&spec, &CancelToken::never())
        .await
        .unwrap();

    assert!(report.completed());
    assert!(report.errors.is_empty());
    assert!(report.after.is_some());
    assert!(matches!(report.teardown_error, Some(Error::Transport(_))));
    assert!(traffic.protocols_running());
}

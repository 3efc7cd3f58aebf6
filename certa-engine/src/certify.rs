//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use certa_utils::cancel::CancelToken;
use certa_utils::telemetry::TelemetrySource;
use certa_utils::traffic::TrafficController;
use tracing::{info, info_span};

use crate::config::Config;
use crate::delta::Delta;
use crate::error::{ConfigError, Error};
use crate::rule::RuleSet;
use crate::run::{RunReport, RunSpec, TrafficRun};
use crate::validate::DeltaValidator;
use crate::verdict::{Check, CheckStatus, Verdict, VerdictRecorder};
use crate::watch::{WatchIntent, WatchResult, WatchSpec};

// Runs a traffic experiment and folds everything it observed into a single
// verdict.
//
// Checks appear in this order: one per convergence watch, one per settle
// watch, then one per rule. Transport failures and counter resets are
// faults that fail the verdict on their own. Nothing is sent to the devices
// when the run spec or the rules are malformed.
pub async fn certify<C>(
    controller: &mut C,
    source: Arc<dyn TelemetrySource>,
    spec: &RunSpec,
    rules: &RuleSet,
    config: &Config,
    cancel: &CancelToken,
) -> Result<Verdict, Error>
where
    C: TrafficController + ?Sized,
{
    spec.validate()?;
    validate_rule_counters(spec, rules)?;

    let report = TrafficRun::new(controller, source, config)
        .run_validated(spec, cancel)
        .await;
    let verdict = fold(spec, rules, &report);

    let span = info_span!("certify", label = %spec.label);
    span.in_scope(|| {
        info!(
            passed = %verdict.passed(),
            cancelled = %verdict.cancelled(),
            checks = %verdict.checks().len(),
            faults = %verdict.faults().len(),
            "verdict ready"
        );
    });

    if config.recorder.enabled {
        let recorder = VerdictRecorder::new(&spec.label, &config.recorder);
        if let Some(mut recorder) = recorder {
            recorder.record(&verdict);
        }
    }

    Ok(verdict)
}

// ===== helper functions =====

// Every counter a rule reads must be captured by the run.
fn validate_rule_counters(
    spec: &RunSpec,
    rules: &RuleSet,
) -> Result<(), ConfigError> {
    for rule in rules {
        for name in rule.counter_names() {
            if spec.counter(name).is_none() {
                return Err(ConfigError::RuleUnknownCounter(
                    rule.description().to_owned(),
                    name.to_owned(),
                ));
            }
        }
    }
    Ok(())
}

fn fold(spec: &RunSpec, rules: &RuleSet, report: &RunReport) -> Verdict {
    let mut checks =
        watch_checks("convergence", &spec.convergence, &report.convergence);
    checks.extend(watch_checks("settle", &spec.settle, &report.settle));

    // Counter resets are reported again by the rule evaluation.
    let mut faults = report
        .errors
        .iter()
        .filter(|error| error.is_fault())
        .filter(|error| !matches!(error, Error::CounterReset(_)))
        .cloned()
        .collect::<Vec<_>>();

    let validator = DeltaValidator::new(rules);
    match (&report.before, &report.after) {
        (Some(before), Some(after)) => {
            let delta = Delta::compute(before, after);
            let (rule_checks, rule_faults) = validator.evaluate_delta(&delta);
            checks.extend(rule_checks);
            faults.extend(rule_faults);
        }
        _ => {
            let reason = match report.aborted_at {
                Some(step) if report.cancelled => {
                    format!("run cancelled during {step}")
                }
                Some(step) => format!("run aborted at {step}"),
                None => "counters not captured".to_owned(),
            };
            checks.extend(validator.unmeasured(&reason));
        }
    }

    Verdict::new(checks, faults, report.cancelled)
}

// A `Never` watch that read nothing proves nothing either way.
fn unobserved(spec: &WatchSpec, result: &WatchResult) -> bool {
    spec.intent == WatchIntent::Never && result.samples_taken == 0
}

// One check per watch. Watches that never ran (e.g. after an early abort)
// are inconclusive.
fn watch_checks(
    phase: &str,
    specs: &[WatchSpec],
    results: &[WatchResult],
) -> Vec<Check> {
    specs
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let description = format!("{phase}: {}", spec.description());
            let Some(result) = results.get(index) else {
                return Check::new(
                    description,
                    CheckStatus::Inconclusive,
                    "not evaluated",
                );
            };
            let status = if result.meets(spec.intent) {
                CheckStatus::Pass
            } else if result.cancelled || unobserved(spec, result) {
                CheckStatus::Inconclusive
            } else {
                CheckStatus::Fail
            };
            let mut detail = result.detail();
            if spec.intent == WatchIntent::Never {
                detail.insert_str(0, "expected never; ");
            }
            Check::new(description, status, detail)
        })
        .collect()
}

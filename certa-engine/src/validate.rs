//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use itertools::Itertools;

use crate::debug::Debug;
use crate::delta::{Delta, DiffError};
use crate::error::Error;
use crate::rule::{CounterGroup, Operand, Rule, RuleSet, ToleranceRule};
use crate::snapshot::CounterSnapshot;
use crate::verdict::{Check, CheckStatus, Verdict};

// Slack for floating-point comparisons of percentages.
const PCT_EPSILON: f64 = 1e-9;

// Evaluates tolerance rules against the counter deltas of a run.
#[derive(Clone, Copy, Debug)]
pub struct DeltaValidator<'a> {
    rules: &'a RuleSet,
}

type RuleOutcome = Result<(CheckStatus, String), DiffError>;

// ===== impl DeltaValidator =====

impl<'a> DeltaValidator<'a> {
    pub fn new(rules: &'a RuleSet) -> Self {
        DeltaValidator { rules }
    }

    // Produces a verdict with one check per rule, in rule order.
    //
    // Counters that went backwards are faults: the verdict fails even when
    // no rule reads them.
    pub fn evaluate(
        &self,
        before: &CounterSnapshot,
        after: &CounterSnapshot,
    ) -> Verdict {
        let delta = Delta::compute(before, after);
        let (checks, faults) = self.evaluate_delta(&delta);
        Verdict::new(checks, faults, false)
    }

    pub(crate) fn evaluate_delta(
        &self,
        delta: &Delta,
    ) -> (Vec<Check>, Vec<Error>) {
        let checks = self.rules.iter().map(|rule| check(rule, delta)).collect();
        let faults = delta
            .resets()
            .iter()
            .cloned()
            .map(Error::CounterReset)
            .collect();
        (checks, faults)
    }

    // Checks for rules that couldn't be measured at all.
    pub(crate) fn unmeasured(&self, reason: &str) -> Vec<Check> {
        self.rules
            .iter()
            .map(|rule| {
                Check::new(
                    rule.description(),
                    CheckStatus::Inconclusive,
                    format!("not measured: {reason}"),
                )
            })
            .collect()
    }
}

// ===== helper functions =====

fn check(rule: &Rule, delta: &Delta) -> Check {
    let (status, detail) = match evaluate_rule(rule, delta) {
        Ok(outcome) => outcome,
        Err(error @ DiffError::Reset(_)) => {
            (CheckStatus::Fail, error.to_string())
        }
        Err(error) => (CheckStatus::Inconclusive, error.to_string()),
    };
    Debug::CheckEvaluated(rule.description(), status).log();
    Check::new(rule.description(), status, detail)
}

fn evaluate_rule(rule: &Rule, delta: &Delta) -> RuleOutcome {
    match (rule.tolerance(), rule.operand()) {
        (ToleranceRule::ExactMatch { expected }, Operand::Counter(group)) => {
            let diff = delta.sum(group.names())?;
            let detail =
                format!("{group} advanced by {diff}, expected {expected}");
            Ok((status(diff == *expected), detail))
        }
        (ToleranceRule::AtLeast { min }, Operand::Counter(group)) => {
            let diff = delta.sum(group.names())?;
            let detail = format!("{group} advanced by {diff}, minimum {min}");
            Ok((status(diff >= *min), detail))
        }
        (ToleranceRule::ZeroLoss, Operand::Pair { tx, rx }) => {
            let tx_diff = delta.sum(tx.names())?;
            let rx_diff = delta.sum(rx.names())?;
            let lost = i128::from(tx_diff) - i128::from(rx_diff);
            let detail = format!("tx {tx_diff}, rx {rx_diff}, lost {lost}");
            Ok((status(tx_diff == rx_diff), detail))
        }
        (
            ToleranceRule::BoundedLossPercent { max_pct },
            Operand::Pair { tx, rx },
        ) => {
            let tx_diff = delta.sum(tx.names())?;
            let rx_diff = delta.sum(rx.names())?;
            if tx_diff == 0 {
                let detail = format!("no packets transmitted on {tx}");
                return Ok((CheckStatus::Inconclusive, detail));
            }
            let loss_pct =
                (tx_diff as f64 - rx_diff as f64) * 100.0 / tx_diff as f64;
            let passed = loss_pct <= max_pct + PCT_EPSILON;
            let detail = format!(
                "loss {loss_pct:.1}% {} {max_pct:.1}% \
                 (tx {tx_diff}, rx {rx_diff})",
                if passed { "<=" } else { ">" }
            );
            Ok((status(passed), detail))
        }
        (
            ToleranceRule::BoundedRangePercent {
                expected_pct,
                tolerance_pct,
            },
            Operand::Group(members),
        ) => {
            let expected = vec![*expected_pct; members.len()];
            range_check(delta, members, &expected, *tolerance_pct)
        }
        (
            ToleranceRule::WeightedRangePercent {
                weights,
                tolerance_pct,
            },
            Operand::Group(members),
        ) => {
            let total: f64 = weights.iter().sum();
            let expected = weights
                .iter()
                .map(|weight| weight * 100.0 / total)
                .collect::<Vec<_>>();
            range_check(delta, members, &expected, *tolerance_pct)
        }
        // Ruled out when the rule was built.
        _ => unreachable!(),
    }
}

// Checks the share of each group member against its expected percentage.
fn range_check(
    delta: &Delta,
    members: &[CounterGroup],
    expected: &[f64],
    tolerance_pct: f64,
) -> RuleOutcome {
    let diffs = members
        .iter()
        .map(|member| delta.sum(member.names()))
        .collect::<Result<Vec<_>, _>>()?;
    let total = diffs
        .iter()
        .try_fold(0u64, |total, diff| total.checked_add(*diff))
        .ok_or(DiffError::Overflow)?;
    if total == 0 {
        let detail = "no packets counted on any group member".to_owned();
        return Ok((CheckStatus::Inconclusive, detail));
    }

    let mut passed = true;
    let detail = members
        .iter()
        .zip(diffs)
        .zip(expected)
        .map(|((member, diff), expected_pct)| {
            let share = diff as f64 * 100.0 / total as f64;
            let in_range =
                (share - expected_pct).abs() <= tolerance_pct + PCT_EPSILON;
            passed &= in_range;
            format!(
                "{member} {share:.1}% (expected {expected_pct:.1}% ± \
                 {tolerance_pct:.1}%){}",
                if in_range { "" } else { " out of range" }
            )
        })
        .join(", ");
    Ok((status(passed), detail))
}

fn status(passed: bool) -> CheckStatus {
    if passed {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    }
}

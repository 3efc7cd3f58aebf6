//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use certa_engine::error::Error;
use certa_engine::rule::{Rule, RuleSet};
use certa_engine::snapshot::CounterSnapshot;
use certa_engine::validate::DeltaValidator;
use certa_engine::verdict::{CheckStatus, Verdict};
use itertools::Itertools;

fn snapshot(label: &str, values: &[(&str, u64)]) -> CounterSnapshot {
    CounterSnapshot::new(label, values.iter().copied())
}

fn evaluate(
    rules: &RuleSet,
    before: &[(&str, u64)],
    after: &[(&str, u64)],
) -> Verdict {
    let before = snapshot("before", before);
    let after = snapshot("after", after);
    DeltaValidator::new(rules).evaluate(&before, &after)
}

#[test]
fn lossless_flow() {
    let rules = RuleSet::from_iter([Rule::zero_loss("tx", "rx").unwrap()]);
    let before = [("tx", 0), ("rx", 0)];
    let verdict = evaluate(&rules, &before, &[("tx", 1000), ("rx", 1000)]);

    assert!(verdict.passed());
    assert!(verdict.faults().is_empty());
    assert_eq!(verdict.checks().len(), 1);
    assert_eq!(verdict.checks()[0].detail, "tx 1000, rx 1000, lost 0");
}

#[test]
fn loss_within_bound() {
    let rules =
        RuleSet::from_iter([Rule::bounded_loss("tx", "rx", 10.0).unwrap()]);
    let verdict =
        evaluate(&rules, &[("tx", 0), ("rx", 0)], &[("tx", 1000), ("rx", 950)]);

    assert!(verdict.passed());
    assert_eq!(
        verdict.checks()[0].detail,
        "loss 5.0% <= 10.0% (tx 1000, rx 950)"
    );
}

#[test]
fn loss_beyond_bound() {
    let rules =
        RuleSet::from_iter([Rule::bounded_loss("tx", "rx", 10.0).unwrap()]);
    let verdict =
        evaluate(&rules, &[("tx", 0), ("rx", 0)], &[("tx", 1000), ("rx", 800)]);

    assert!(!verdict.passed());
    assert!(!verdict.is_inconclusive());
    let check = &verdict.checks()[0];
    assert_eq!(check.status, CheckStatus::Fail);
    assert!(check.detail.contains("20.0% > 10.0%"), "{}", check.detail);
}

#[test]
fn counter_reset_fails_regardless_of_rules() {
    // No rule reads the counter that went backwards.
    let before = [("tx", 0), ("rx", 500)];
    let after = [("tx", 100), ("rx", 400)];
    let rules = RuleSet::from_iter([Rule::at_least("tx", 1).unwrap()]);
    let verdict = evaluate(&rules, &before, &after);

    assert!(!verdict.passed());
    assert_eq!(verdict.checks()[0].status, CheckStatus::Pass);
    assert!(matches!(
        verdict.faults(),
        [Error::CounterReset(reset)]
            if reset.counter == "rx"
                && reset.before == 500
                && reset.after == 400
    ));

    // A rule reading it fails instead of reporting a negative diff.
    let rules = RuleSet::from_iter([Rule::zero_loss("tx", "rx").unwrap()]);
    let verdict = evaluate(&rules, &before, &after);
    let check = &verdict.checks()[0];
    assert_eq!(check.status, CheckStatus::Fail);
    assert_eq!(
        check.detail,
        "counter reset detected on rx: before=500 after=400"
    );
}

#[test]
fn checks_follow_rule_order() {
    let rules = vec![
        Rule::zero_loss("flow1.tx", "flow1.rx").unwrap(),
        Rule::bounded_loss("flow2.tx", "flow2.rx", 1.0).unwrap(),
        Rule::at_least("flow3.rx", 10).unwrap(),
        Rule::exact_match("flow1.tx", 500).unwrap(),
    ];
    let before = [
        ("flow1.tx", 0),
        ("flow1.rx", 0),
        ("flow2.tx", 0),
        ("flow2.rx", 0),
        ("flow3.rx", 0),
    ];
    let after = [
        ("flow1.tx", 500),
        ("flow1.rx", 500),
        ("flow2.tx", 1000),
        ("flow2.rx", 900),
        ("flow3.rx", 5),
    ];

    for permutation in rules.iter().cloned().permutations(rules.len()) {
        let descriptions = permutation
            .iter()
            .map(|rule| rule.description().to_owned())
            .collect::<Vec<_>>();
        let rules = permutation.into_iter().collect::<RuleSet>();
        let verdict = evaluate(&rules, &before, &after);

        let checks = verdict
            .checks()
            .iter()
            .map(|check| check.description.clone())
            .collect::<Vec<_>>();
        assert_eq!(checks, descriptions);
        assert_eq!(
            verdict.checks().iter().filter(|check| check.passed()).count(),
            2
        );
    }
}

#[test]
fn nothing_transmitted_is_inconclusive() {
    let rules =
        RuleSet::from_iter([Rule::bounded_loss("tx", "rx", 10.0).unwrap()]);
    let verdict =
        evaluate(&rules, &[("tx", 10), ("rx", 10)], &[("tx", 10), ("rx", 10)]);

    assert!(!verdict.passed());
    assert!(verdict.is_inconclusive());
    let check = &verdict.checks()[0];
    assert_eq!(check.status, CheckStatus::Inconclusive);
    assert_eq!(check.detail, "no packets transmitted on tx");
}

#[test]
fn missing_counter_is_inconclusive() {
    let rules = RuleSet::from_iter([Rule::zero_loss("tx", "rx").unwrap()]);
    let verdict = evaluate(&rules, &[("tx", 0)], &[("tx", 100), ("rx", 100)]);

    assert!(verdict.is_inconclusive());
    assert_eq!(
        verdict.checks()[0].detail,
        "counter rx missing from a snapshot"
    );
}

#[test]
fn exact_and_minimum_counts() {
    let rules = RuleSet::from_iter([
        Rule::exact_match("rx", 1000).unwrap(),
        Rule::exact_match("rx", 999).unwrap(),
        Rule::at_least("rx", 1000).unwrap(),
        Rule::at_least("rx", 1001).unwrap(),
    ]);
    let verdict = evaluate(&rules, &[("rx", 50)], &[("rx", 1050)]);

    let statuses = verdict
        .checks()
        .iter()
        .map(|check| check.status)
        .collect::<Vec<_>>();
    assert_eq!(
        statuses,
        [
            CheckStatus::Pass,
            CheckStatus::Fail,
            CheckStatus::Pass,
            CheckStatus::Fail
        ]
    );
    assert_eq!(
        verdict.checks()[1].detail,
        "rx advanced by 1000, expected 999"
    );
}

#[test]
fn ecmp_distribution() {
    let members = ["path1", "path2", "path3", "path4"];
    let rules =
        RuleSet::from_iter([Rule::bounded_range(&members, 25.0, 5.0).unwrap()]);
    let before = members.map(|member| (member, 0));

    let balanced = [
        ("path1", 2400),
        ("path2", 2600),
        ("path3", 2500),
        ("path4", 2500),
    ];
    let verdict = evaluate(&rules, &before, &balanced);
    assert!(verdict.passed(), "{verdict}");

    let skewed = [
        ("path1", 4000),
        ("path2", 2000),
        ("path3", 2000),
        ("path4", 2000),
    ];
    let verdict = evaluate(&rules, &before, &skewed);
    assert!(!verdict.passed());
    let detail = &verdict.checks()[0].detail;
    assert!(
        detail.starts_with("path1 40.0% (expected 25.0% ± 5.0%) out of range"),
        "{detail}"
    );
    assert!(detail.contains("path2 20.0% (expected 25.0% ± 5.0%), "));
}

#[test]
fn ucmp_distribution() {
    let rules = RuleSet::from_iter([Rule::weighted_range(
        &["wide", "narrow"],
        &[3.0, 1.0],
        5.0,
    )
    .unwrap()]);
    let before = [("wide", 0), ("narrow", 0)];

    let after = [("wide", 7300), ("narrow", 2700)];
    let verdict = evaluate(&rules, &before, &after);
    assert!(verdict.passed(), "{verdict}");

    let after = [("wide", 5000), ("narrow", 5000)];
    let verdict = evaluate(&rules, &before, &after);
    assert!(!verdict.passed());
    assert_eq!(verdict.checks()[0].status, CheckStatus::Fail);
}

#[test]
fn verdict_report() {
    let rules = RuleSet::from_iter([
        Rule::zero_loss("tx", "rx")
            .unwrap()
            .with_description("flow1 delivered"),
        Rule::at_least("rx", 1).unwrap().with_description("flow1 seen"),
    ]);
    let verdict =
        evaluate(&rules, &[("tx", 0), ("rx", 0)], &[("tx", 1000), ("rx", 990)]);

    assert_eq!(
        verdict.to_string(),
        "FAIL (1/2 checks passed)\n\
         \x20 [fail] flow1 delivered: tx 1000, rx 990, lost 10\n\
         \x20 [pass] flow1 seen: rx advanced by 990, minimum 1\n"
    );

    let jsonl = verdict.to_jsonl().unwrap();
    let lines = jsonl.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["description"], "flow1 delivered");
    assert_eq!(record["passed"], false);
    assert_eq!(record["status"], "fail");
}

//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// Criterion applied to counter deltas.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ToleranceRule {
    // The counter advanced by exactly this amount.
    ExactMatch { expected: u64 },
    // The counter advanced by at least this amount.
    AtLeast { min: u64 },
    // Every transmitted packet was received.
    ZeroLoss,
    // (tx - rx) / tx, as a percentage, doesn't exceed `max_pct`.
    BoundedLossPercent { max_pct: f64 },
    // Every group member carries `expected_pct` ± `tolerance_pct` of the
    // group total.
    BoundedRangePercent { expected_pct: f64, tolerance_pct: f64 },
    // Like `BoundedRangePercent`, with the expected share of each member
    // derived from its relative weight.
    WeightedRangePercent { weights: Vec<f64>, tolerance_pct: f64 },
}

// One or more counters whose deltas are summed into a single operand
// (e.g. the receive counters of all members of a LAG).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(from = "CounterGroupRepr", into = "Vec<String>")]
pub struct CounterGroup(Vec<String>);

// Counters a rule applies to.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operand {
    Counter(CounterGroup),
    Pair { tx: CounterGroup, rx: CounterGroup },
    Group(Vec<CounterGroup>),
}

// Validated pairing of an operand with a tolerance rule.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    description: String,
    operand: Operand,
    tolerance: ToleranceRule,
}

// Ordered list of rules. Evaluation preserves this order.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

// Rule as written in a rules file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub description: Option<String>,
    pub operand: Operand,
    pub tolerance: ToleranceRule,
}

// Rules file layout.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulesFile {
    pub rule: Vec<RuleConfig>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CounterGroupRepr {
    Single(String),
    Multiple(Vec<String>),
}

// ===== impl ToleranceRule =====

impl ToleranceRule {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ToleranceRule::ExactMatch { .. } => "exact-match",
            ToleranceRule::AtLeast { .. } => "at-least",
            ToleranceRule::ZeroLoss => "zero-loss",
            ToleranceRule::BoundedLossPercent { .. } => "bounded-loss-percent",
            ToleranceRule::BoundedRangePercent { .. } => {
                "bounded-range-percent"
            }
            ToleranceRule::WeightedRangePercent { .. } => {
                "weighted-range-percent"
            }
        }
    }
}

impl std::fmt::Display for ToleranceRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToleranceRule::ExactMatch { expected } => {
                write!(f, "== {expected}")
            }
            ToleranceRule::AtLeast { min } => {
                write!(f, ">= {min}")
            }
            ToleranceRule::ZeroLoss => {
                write!(f, "zero loss")
            }
            ToleranceRule::BoundedLossPercent { max_pct } => {
                write!(f, "loss <= {max_pct:.1}%")
            }
            ToleranceRule::BoundedRangePercent {
                expected_pct,
                tolerance_pct,
            } => {
                write!(f, "{expected_pct:.1}% ± {tolerance_pct:.1}% each")
            }
            ToleranceRule::WeightedRangePercent {
                weights,
                tolerance_pct,
            } => {
                write!(
                    f,
                    "weights {} ± {tolerance_pct:.1}%",
                    weights.iter().join(":")
                )
            }
        }
    }
}

// ===== impl CounterGroup =====

impl CounterGroup {
    pub fn new<I, S>(names: I) -> CounterGroup
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CounterGroup(names.into_iter().map(Into::into).collect())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for CounterGroup {
    fn from(name: &str) -> CounterGroup {
        CounterGroup(vec![name.to_owned()])
    }
}

impl From<String> for CounterGroup {
    fn from(name: String) -> CounterGroup {
        CounterGroup(vec![name])
    }
}

impl From<CounterGroupRepr> for CounterGroup {
    fn from(repr: CounterGroupRepr) -> CounterGroup {
        match repr {
            CounterGroupRepr::Single(name) => CounterGroup(vec![name]),
            CounterGroupRepr::Multiple(names) => CounterGroup(names),
        }
    }
}

impl From<CounterGroup> for Vec<String> {
    fn from(group: CounterGroup) -> Vec<String> {
        group.0
    }
}

impl std::fmt::Display for CounterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().join("+"))
    }
}

// ===== impl Operand =====

impl Operand {
    pub fn pair(
        tx: impl Into<CounterGroup>,
        rx: impl Into<CounterGroup>,
    ) -> Operand {
        Operand::Pair {
            tx: tx.into(),
            rx: rx.into(),
        }
    }

    pub fn group<I, G>(members: I) -> Operand
    where
        I: IntoIterator<Item = G>,
        G: Into<CounterGroup>,
    {
        Operand::Group(members.into_iter().map(Into::into).collect())
    }

    // All counter groups referenced by the operand.
    pub fn groups(&self) -> Vec<&CounterGroup> {
        match self {
            Operand::Counter(group) => vec![group],
            Operand::Pair { tx, rx } => vec![tx, rx],
            Operand::Group(members) => members.iter().collect(),
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Counter(group) => write!(f, "{group}"),
            Operand::Pair { tx, rx } => write!(f, "{tx} -> {rx}"),
            Operand::Group(members) => {
                write!(f, "[{}]", members.iter().join(", "))
            }
        }
    }
}

// ===== impl Rule =====

impl Rule {
    // Binds a tolerance rule to its operand, rejecting combinations that
    // can't be evaluated.
    pub fn new(
        operand: Operand,
        tolerance: ToleranceRule,
    ) -> Result<Rule, ConfigError> {
        let description =
            format!("{} {} {}", tolerance.kind_name(), operand, tolerance);
        let rule = Rule {
            description,
            operand,
            tolerance,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn exact_match(
        counter: &str,
        expected: u64,
    ) -> Result<Rule, ConfigError> {
        Rule::new(
            Operand::Counter(counter.into()),
            ToleranceRule::ExactMatch { expected },
        )
    }

    pub fn at_least(counter: &str, min: u64) -> Result<Rule, ConfigError> {
        Rule::new(
            Operand::Counter(counter.into()),
            ToleranceRule::AtLeast { min },
        )
    }

    pub fn zero_loss(tx: &str, rx: &str) -> Result<Rule, ConfigError> {
        Rule::new(Operand::pair(tx, rx), ToleranceRule::ZeroLoss)
    }

    pub fn bounded_loss(
        tx: &str,
        rx: &str,
        max_pct: f64,
    ) -> Result<Rule, ConfigError> {
        Rule::new(
            Operand::pair(tx, rx),
            ToleranceRule::BoundedLossPercent { max_pct },
        )
    }

    pub fn bounded_range(
        members: &[&str],
        expected_pct: f64,
        tolerance_pct: f64,
    ) -> Result<Rule, ConfigError> {
        Rule::new(
            Operand::group(members.iter().copied()),
            ToleranceRule::BoundedRangePercent {
                expected_pct,
                tolerance_pct,
            },
        )
    }

    pub fn weighted_range(
        members: &[&str],
        weights: &[f64],
        tolerance_pct: f64,
    ) -> Result<Rule, ConfigError> {
        Rule::new(
            Operand::group(members.iter().copied()),
            ToleranceRule::WeightedRangePercent {
                weights: weights.to_vec(),
                tolerance_pct,
            },
        )
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    pub fn tolerance(&self) -> &ToleranceRule {
        &self.tolerance
    }

    // Names of all counters the rule reads.
    pub fn counter_names(&self) -> impl Iterator<Item = &str> {
        self.operand.groups().into_iter().flat_map(CounterGroup::names)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.operand.groups().iter().any(|group| group.is_empty()) {
            return Err(ConfigError::RuleEmptyOperand(self.name()));
        }

        match &self.tolerance {
            ToleranceRule::ExactMatch { .. }
            | ToleranceRule::AtLeast { .. } => {
                if !matches!(self.operand, Operand::Counter(_)) {
                    return Err(ConfigError::RuleNeedsSingle(self.name()));
                }
                Ok(())
            }
            ToleranceRule::ZeroLoss => self.validate_pair(),
            ToleranceRule::BoundedLossPercent { max_pct } => {
                self.validate_pair()?;
                self.validate_percent(*max_pct)
            }
            ToleranceRule::BoundedRangePercent {
                expected_pct,
                tolerance_pct,
            } => {
                self.validate_group()?;
                self.validate_percent(*expected_pct)?;
                self.validate_percent(*tolerance_pct)
            }
            ToleranceRule::WeightedRangePercent {
                weights,
                tolerance_pct,
            } => {
                let members = self.validate_group()?;
                if weights.len() != members {
                    return Err(ConfigError::RuleWeightsMismatch(
                        self.name(),
                        weights.len(),
                        members,
                    ));
                }
                if let Some(weight) = weights
                    .iter()
                    .find(|weight| !weight.is_finite() || **weight <= 0.0)
                {
                    let name = self.name();
                    return Err(ConfigError::RuleBadWeight(name, *weight));
                }
                self.validate_percent(*tolerance_pct)
            }
        }
    }

    fn validate_pair(&self) -> Result<(), ConfigError> {
        match self.operand {
            Operand::Pair { .. } => Ok(()),
            _ => Err(ConfigError::RuleNeedsPair(self.name())),
        }
    }

    // Returns the number of group members.
    fn validate_group(&self) -> Result<usize, ConfigError> {
        let members = match &self.operand {
            Operand::Group(members) => members.len(),
            _ => 0,
        };
        if members < 2 {
            return Err(ConfigError::RuleNeedsGroup(self.name(), members));
        }
        Ok(members)
    }

    // Percentages must lie within [0, 100]; NaN is rejected as well.
    fn validate_percent(&self, value: f64) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&value) {
            return Err(ConfigError::RuleBadPercent(self.name(), value));
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.description.clone()
    }
}

impl TryFrom<RuleConfig> for Rule {
    type Error = ConfigError;

    fn try_from(config: RuleConfig) -> Result<Rule, ConfigError> {
        let rule = Rule::new(config.operand, config.tolerance)?;
        Ok(match config.description {
            Some(description) => rule.with_description(description),
            None => rule,
        })
    }
}

// ===== impl RuleSet =====

impl RuleSet {
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    // Distinct names of all counters read by the rules.
    pub fn counter_names(&self) -> BTreeSet<&str> {
        self.rules.iter().flat_map(Rule::counter_names).collect()
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> RuleSet {
        RuleSet {
            rules: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

impl TryFrom<RulesFile> for RuleSet {
    type Error = ConfigError;

    fn try_from(file: RulesFile) -> Result<RuleSet, ConfigError> {
        file.rule.into_iter().map(Rule::try_from).collect()
    }
}

// ===== impl RulesFile =====

impl RulesFile {
    pub fn parse(
        name: &str,
        rules_str: &str,
    ) -> Result<RulesFile, ConfigError> {
        toml::from_str(rules_str).map_err(|error| {
            ConfigError::FileParse(name.to_owned(), error.to_string())
        })
    }
}

//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use crate::error::CounterReset;
use crate::snapshot::CounterSnapshot;

// Before and after values of one counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeltaEntry {
    pub before: u64,
    pub after: u64,
}

// Per-counter differences between two snapshots.
//
// Counters are monotonic: an `after` value lower than the `before` value is
// recorded as a reset and never turned into a diff.
#[derive(Clone, Debug, Default)]
pub struct Delta {
    entries: BTreeMap<String, DeltaEntry>,
    resets: Vec<CounterReset>,
    missing: BTreeSet<String>,
}

// Why a counter diff is unavailable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiffError {
    Missing(String),
    Reset(CounterReset),
    Overflow,
}

// ===== impl DeltaEntry =====

impl DeltaEntry {
    pub fn diff(&self) -> Option<u64> {
        self.after.checked_sub(self.before)
    }
}

// ===== impl Delta =====

impl Delta {
    pub fn compute(before: &CounterSnapshot, after: &CounterSnapshot) -> Delta {
        let mut delta = Delta::default();

        for (name, &before_value) in &before.values {
            let Some(after_value) = after.get(name) else {
                delta.missing.insert(name.clone());
                continue;
            };
            let entry = DeltaEntry {
                before: before_value,
                after: after_value,
            };
            if entry.diff().is_none() {
                delta.resets.push(CounterReset {
                    counter: name.clone(),
                    before: before_value,
                    after: after_value,
                });
            }
            delta.entries.insert(name.clone(), entry);
        }
        for name in after.values.keys() {
            if !before.values.contains_key(name) {
                delta.missing.insert(name.clone());
            }
        }

        delta
    }

    // Returns `after - before` for the given counter.
    pub fn diff(&self, name: &str) -> Result<u64, DiffError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| DiffError::Missing(name.to_owned()))?;
        entry.diff().ok_or_else(|| {
            DiffError::Reset(CounterReset {
                counter: name.to_owned(),
                before: entry.before,
                after: entry.after,
            })
        })
    }

    // Returns the sum of the diffs of the given counters.
    pub fn sum<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<u64, DiffError> {
        names.into_iter().try_fold(0u64, |total, name| {
            total.checked_add(self.diff(name)?).ok_or(DiffError::Overflow)
        })
    }

    // Iterates over `(name, before, after, diff)`; the diff is `None` for
    // counters that went backwards.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&str, u64, u64, Option<u64>)> + '_ {
        self.entries.iter().map(|(name, entry)| {
            (name.as_str(), entry.before, entry.after, entry.diff())
        })
    }

    pub fn resets(&self) -> &[CounterReset] {
        &self.resets
    }

    // Counters present in only one of the two snapshots.
    pub fn missing(&self) -> &BTreeSet<String> {
        &self.missing
    }
}

// ===== impl DiffError =====

impl std::fmt::Display for DiffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffError::Missing(name) => {
                write!(f, "counter {name} missing from a snapshot")
            }
            DiffError::Reset(reset) => {
                write!(
                    f,
                    "counter reset detected on {}: before={} after={}",
                    reset.counter, reset.before, reset.after
                )
            }
            DiffError::Overflow => {
                write!(f, "counter sum overflows 64 bits")
            }
        }
    }
}

//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config;
use crate::error::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Inconclusive,
}

// Outcome of one watch or tolerance rule.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Check {
    pub description: String,
    pub status: CheckStatus,
    pub detail: String,
}

// Final pass/fail decision of a test, immutable once built.
//
// A verdict passes only when every check passed, no fault invalidated the
// measurement and the run wasn't cancelled. Checks keep the order in which
// they were evaluated.
#[derive(Clone, Debug)]
#[derive(Serialize)]
pub struct Verdict {
    passed: bool,
    cancelled: bool,
    checks: Vec<Check>,
    faults: Vec<Error>,
}

// Flat machine-readable form of a check or fault.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct VerdictRecord {
    pub description: String,
    pub passed: bool,
    pub status: CheckStatus,
    pub detail: String,
}

// Writes verdict records to a JSON Lines file, one file per test label.
#[derive(Debug)]
pub struct VerdictRecorder(std::fs::File);

// ===== impl CheckStatus =====

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "pass"),
            CheckStatus::Fail => write!(f, "fail"),
            CheckStatus::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

// ===== impl Check =====

impl Check {
    pub fn new(
        description: impl Into<String>,
        status: CheckStatus,
        detail: impl Into<String>,
    ) -> Check {
        Check {
            description: description.into(),
            status,
            detail: detail.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

// ===== impl Verdict =====

impl Verdict {
    pub fn new(
        checks: Vec<Check>,
        faults: Vec<Error>,
        cancelled: bool,
    ) -> Verdict {
        let passed = !cancelled
            && faults.is_empty()
            && checks.iter().all(Check::passed);
        Verdict {
            passed,
            cancelled,
            checks,
            faults,
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn faults(&self) -> &[Error] {
        &self.faults
    }

    // Returns whether the verdict failed only because some checks couldn't
    // be decided.
    pub fn is_inconclusive(&self) -> bool {
        !self.passed
            && !self.cancelled
            && self.faults.is_empty()
            && self.checks.iter().all(|check| check.status != CheckStatus::Fail)
    }

    // Checks in evaluation order followed by one record per fault.
    pub fn records(&self) -> Vec<VerdictRecord> {
        let checks = self.checks.iter().map(|check| VerdictRecord {
            description: check.description.clone(),
            passed: check.passed(),
            status: check.status,
            detail: check.detail.clone(),
        });
        let faults = self.faults.iter().map(|fault| VerdictRecord {
            description: format!("fault: {fault}"),
            passed: false,
            status: CheckStatus::Fail,
            detail: fault_detail(fault),
        });
        checks.chain(faults).collect()
    }

    // Records serialized as JSON Lines.
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut output = String::new();
        for record in self.records() {
            output.push_str(&serde_json::to_string(&record)?);
            output.push('\n');
        }
        Ok(output)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let outcome = if self.cancelled {
            "CANCELLED"
        } else if self.passed {
            "PASS"
        } else {
            "FAIL"
        };
        let passed = self.checks.iter().filter(|check| check.passed()).count();
        writeln!(
            f,
            "{outcome} ({passed}/{} checks passed)",
            self.checks.len()
        )?;
        for check in &self.checks {
            writeln!(
                f,
                "  [{}] {}: {}",
                check.status, check.description, check.detail
            )?;
        }
        for fault in &self.faults {
            writeln!(f, "  [fault] {}", fault_detail(fault))?;
        }
        Ok(())
    }
}

// ===== impl VerdictRecorder =====

impl VerdictRecorder {
    // Creates (or truncates) `<dir>/certa-verdict-<label>.jsonl`.
    //
    // Characters of the label that aren't safe in a file name are replaced,
    // so the file always lands in `dir`.
    pub fn new(label: &str, config: &config::Recorder) -> Option<Self> {
        let path = std::path::Path::new(&config.dir).join(file_name(label));

        match std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
        {
            Ok(file) => Some(VerdictRecorder(file)),
            Err(error) => {
                warn!(%error, path = %path.display(), "couldn't write to file");
                None
            }
        }
    }

    pub fn record(&mut self, verdict: &Verdict) {
        let records = match verdict.to_jsonl() {
            Ok(records) => records,
            Err(error) => {
                warn!(%error, "couldn't serialize verdict");
                return;
            }
        };
        if let Err(error) = self.0.write_all(records.as_bytes()) {
            warn!(%error, "couldn't write to file");
        }
    }
}

// ===== helper functions =====

fn file_name(label: &str) -> String {
    let label = label
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect::<String>();
    format!("certa-verdict-{label}.jsonl")
}

fn fault_detail(fault: &Error) -> String {
    match fault {
        Error::Transport(error) => error.to_string(),
        Error::Configuration(error) => error.to_string(),
        _ => fault.to_string(),
    }
}

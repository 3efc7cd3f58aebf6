//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Error};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub watch: Watch,
    pub retry: Retry,
    pub run: Run,
    pub recorder: Recorder,
    pub logging: Logging,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Watch {
    // The default poll interval is the timeout divided by this value...
    pub poll_divisor: u32,
    // ...but never shorter than this.
    pub poll_floor_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Retry {
    pub attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Run {
    pub strict: bool,
    pub stop_protocols: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Recorder {
    pub enabled: bool,
    pub dir: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub style: LoggingStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

// ===== impl Config =====

impl Config {
    pub const DFLT_FILEPATH: &'static str = "/etc/certa.toml";

    // Reads the configuration from a TOML file.
    pub fn read(config_file: &str) -> Result<Config, Error> {
        let config_str =
            std::fs::read_to_string(config_file).map_err(|error| {
                Error::Configuration(ConfigError::FileRead(
                    config_file.to_owned(),
                    error.to_string(),
                ))
            })?;
        Config::parse(config_file, &config_str)
    }

    pub fn parse(name: &str, config_str: &str) -> Result<Config, Error> {
        toml::from_str(config_str).map_err(|error| {
            Error::Configuration(ConfigError::FileParse(
                name.to_owned(),
                error.to_string(),
            ))
        })
    }
}

// ===== impl Watch =====

impl Watch {
    // Default poll interval for a watch without an explicit one.
    pub fn default_poll_interval(&self, timeout: Duration) -> Duration {
        let floor = Duration::from_millis(self.poll_floor_ms);
        let interval = timeout / self.poll_divisor.max(1);
        interval.max(floor).min(timeout)
    }
}

impl Default for Watch {
    fn default() -> Watch {
        Watch {
            poll_divisor: 30,
            poll_floor_ms: 1000,
        }
    }
}

// ===== impl Retry =====

impl Retry {
    // Linear backoff before the given retry attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms) * attempt
    }
}

impl Default for Retry {
    fn default() -> Retry {
        Retry {
            attempts: 3,
            backoff_ms: 200,
        }
    }
}

// ===== impl Run =====

impl Default for Run {
    fn default() -> Run {
        Run {
            strict: false,
            stop_protocols: false,
        }
    }
}

// ===== impl Recorder =====

impl Default for Recorder {
    fn default() -> Recorder {
        Recorder {
            enabled: false,
            dir: "/var/tmp/certa".to_owned(),
        }
    }
}

// ===== impl Logging =====

impl Default for Logging {
    fn default() -> Logging {
        Logging {
            style: LoggingStyle::Full,
            colors: false,
            show_thread_id: false,
            show_source: false,
        }
    }
}

//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use certa_utils::cancel::CancelToken;
use certa_utils::task::{self, Task};
use certa_utils::telemetry::{
    Path, TelemetrySource, TypedValue, Value, ValueStream,
};
use certa_utils::transport::TransportError;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{Instrument, debug_span, warn};

use crate::config::Config;
use crate::debug::Debug;
use crate::error::{ConfigError, Error};

type PredicateFn = dyn Fn(&TypedValue) -> bool + Send + Sync;

// Pure test applied to every sampled value.
//
// Predicates must not block and must not keep state across invocations:
// the same input always yields the same answer.
#[derive(Clone)]
pub struct Predicate {
    name: Arc<str>,
    func: Arc<PredicateFn>,
}

// How the caller interprets the outcome of a watch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WatchIntent {
    // The predicate is expected to hold before the timeout.
    #[default]
    Satisfy,
    // The predicate is expected to never hold within the timeout (e.g. a
    // withdrawn route must not reappear).
    Never,
}

#[derive(Clone, Debug)]
pub struct WatchSpec {
    pub path: Path,
    pub predicate: Predicate,
    pub timeout: Duration,
    pub poll_interval: Option<Duration>,
    pub intent: WatchIntent,
    pub description: Option<String>,
}

// Outcome of a single watch. A timeout is a normal result, not an error.
#[derive(Clone, Debug)]
pub struct WatchResult {
    pub path: Path,
    pub satisfied: bool,
    pub last_value: Option<TypedValue>,
    pub elapsed: Duration,
    pub samples_taken: u32,
    // Persistent read failure that ended the watch, if any.
    pub error: Option<TransportError>,
    pub cancelled: bool,
}

#[derive(Debug)]
enum Outcome {
    Satisfied,
    Timeout,
    Failed(TransportError),
}

// State of one watch in progress.
struct Watcher<'a> {
    source: &'a dyn TelemetrySource,
    spec: &'a WatchSpec,
    config: &'a Config,
    start: Instant,
    deadline: Instant,
    // Reads still in flight past this point are abandoned.
    hard_deadline: Instant,
    poll_interval: Duration,
    samples: u32,
    last_value: Option<TypedValue>,
    last_error: Option<TransportError>,
}

// ===== impl Predicate =====

impl Predicate {
    pub fn new<F>(name: impl AsRef<str>, func: F) -> Predicate
    where
        F: Fn(&TypedValue) -> bool + Send + Sync + 'static,
    {
        Predicate {
            name: Arc::from(name.as_ref()),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn eval(&self, value: &TypedValue) -> bool {
        (self.func)(value)
    }

    // Value is present and equal to the given one.
    pub fn equals(expected: Value) -> Predicate {
        let name = format!("== {expected}");
        Predicate::new(name, move |value| value.value() == Some(&expected))
    }

    // Value is present and equal to any of the given ones.
    pub fn any_of(expected: Vec<Value>) -> Predicate {
        let name = format!(
            "in [{}]",
            itertools::join(expected.iter().map(ToString::to_string), ", ")
        );
        Predicate::new(name, move |value| {
            value.value().is_some_and(|value| expected.contains(value))
        })
    }

    pub fn present() -> Predicate {
        Predicate::new("is present", TypedValue::is_present)
    }

    pub fn absent() -> Predicate {
        Predicate::new("is absent", |value| !value.is_present())
    }

    // Unsigned value is present and at least `min`.
    pub fn uint_at_least(min: u64) -> Predicate {
        Predicate::new(format!(">= {min}"), move |value| {
            value.as_uint().is_some_and(|value| value >= min)
        })
    }

    pub fn not(self) -> Predicate {
        let name = format!("not ({})", self.name);
        Predicate::new(name, move |value| !self.eval(value))
    }
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Predicate").field(&self.name).finish()
    }
}

// ===== impl WatchSpec =====

impl WatchSpec {
    pub fn new(path: Path, predicate: Predicate, timeout: Duration) -> Self {
        WatchSpec {
            path,
            predicate,
            timeout,
            poll_interval: None,
            intent: WatchIntent::default(),
            description: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    pub fn with_intent(mut self, intent: WatchIntent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_description(
        mut self,
        description: impl Into<String>,
    ) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn description(&self) -> String {
        match &self.description {
            Some(description) => description.clone(),
            None => match self.intent {
                WatchIntent::Satisfy => {
                    format!("{} {}", self.path, self.predicate.name())
                }
                WatchIntent::Never => {
                    format!("{} never {}", self.path, self.predicate.name())
                }
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::WatchZeroTimeout(self.path.clone()));
        }
        if let Some(poll_interval) = self.poll_interval {
            if poll_interval.is_zero() || poll_interval > self.timeout {
                return Err(ConfigError::WatchBadPollInterval(
                    self.path.clone(),
                    poll_interval,
                    self.timeout,
                ));
            }
        }
        Ok(())
    }
}

// ===== impl WatchResult =====

impl WatchResult {
    // Returns whether the outcome is the one the intent asked for.
    //
    // A `Never` watch only succeeds when it ran to its timeout without the
    // predicate holding and without read failures, having read the path at
    // least once.
    pub fn meets(&self, intent: WatchIntent) -> bool {
        match intent {
            WatchIntent::Satisfy => self.satisfied,
            WatchIntent::Never => {
                !self.satisfied
                    && self.error.is_none()
                    && !self.cancelled
                    && self.samples_taken > 0
            }
        }
    }

    pub fn detail(&self) -> String {
        let last_value = match &self.last_value {
            Some(value) => value.to_string(),
            None => "<none>".to_owned(),
        };
        let mut detail = format!(
            "satisfied={} last_value={} samples={} elapsed={:?}",
            self.satisfied, last_value, self.samples_taken, self.elapsed
        );
        if let Some(error) = &self.error {
            detail.push_str(&format!(" error=\"{error}\""));
        }
        if self.cancelled {
            detail.push_str(" cancelled");
        }
        detail
    }
}

// ===== impl Watcher =====

impl<'a> Watcher<'a> {
    fn new(
        source: &'a dyn TelemetrySource,
        spec: &'a WatchSpec,
        config: &'a Config,
    ) -> Self {
        let start = Instant::now();
        let deadline = start + spec.timeout;
        let poll_interval = spec.poll_interval.unwrap_or_else(|| {
            config.watch.default_poll_interval(spec.timeout)
        });
        Watcher {
            source,
            spec,
            config,
            start,
            deadline,
            hard_deadline: deadline + poll_interval,
            poll_interval,
            samples: 0,
            last_value: None,
            last_error: None,
        }
    }

    async fn run(mut self, cancel: &CancelToken) -> WatchResult {
        let path = &self.spec.path;
        Debug::WatchStart(path, self.spec.timeout, self.poll_interval).log();

        let outcome = tokio::select! {
            outcome = self.observe() => Some(outcome),
            _ = cancel.cancelled() => None,
        };

        let elapsed = self.start.elapsed();
        let cancelled = outcome.is_none();
        let (satisfied, error) = match outcome {
            Some(Outcome::Satisfied) => {
                Debug::WatchSatisfied(&self.spec.path, self.samples, elapsed)
                    .log();
                (true, None)
            }
            Some(Outcome::Timeout) => {
                Debug::WatchTimeout(&self.spec.path, self.samples, elapsed)
                    .log();
                (false, self.last_error.take())
            }
            Some(Outcome::Failed(error)) => {
                Error::Transport(error.clone()).log();
                (false, Some(error))
            }
            None => (false, self.last_error.take()),
        };

        WatchResult {
            path: self.spec.path.clone(),
            satisfied,
            last_value: self.last_value,
            elapsed,
            samples_taken: self.samples,
            error,
            cancelled,
        }
    }

    async fn observe(&mut self) -> Outcome {
        if let Some(stream) = self.source.subscribe(&self.spec.path) {
            match self.observe_stream(stream).await {
                Some(outcome) => return outcome,
                None => Debug::WatchStreamEnded(&self.spec.path).log(),
            }
        }
        self.observe_poll().await
    }

    // Evaluates every value pushed by the subscription.
    //
    // Returns `None` when the subscription ends (or can't be re-established)
    // before the deadline, in which case the caller falls back to polling.
    async fn observe_stream(
        &mut self,
        mut stream: ValueStream,
    ) -> Option<Outcome> {
        let mut failures = 0;
        loop {
            let next = tokio::time::timeout_at(self.deadline, stream.next());
            let item = match next.await {
                Ok(item) => item,
                Err(_) => return Some(self.sample_at_deadline().await),
            };

            match item {
                Some(Ok(value)) => {
                    failures = 0;
                    if self.evaluate(value) {
                        return Some(Outcome::Satisfied);
                    }
                }
                Some(Err(error)) => {
                    failures += 1;
                    if failures > self.config.retry.attempts {
                        return Some(Outcome::Failed(error));
                    }
                    if !self.backoff(&error, failures).await {
                        return Some(Outcome::Failed(error));
                    }
                    self.last_error = Some(error);
                    stream = self.source.subscribe(&self.spec.path)?;
                }
                None => return None,
            }
        }
    }

    // Reads the path once when the subscription pushed nothing before the
    // deadline.
    async fn sample_at_deadline(&mut self) -> Outcome {
        if self.samples > 0 {
            return Outcome::Timeout;
        }
        match self.sample().await {
            Ok(Some(value)) => {
                if self.evaluate(value) {
                    Outcome::Satisfied
                } else {
                    Outcome::Timeout
                }
            }
            Ok(None) => Outcome::Timeout,
            Err(error) => Outcome::Failed(error),
        }
    }

    // Samples the path at the poll interval until the predicate holds or the
    // deadline passes. The last sample is taken at the deadline.
    async fn observe_poll(&mut self) -> Outcome {
        loop {
            match self.sample().await {
                Ok(Some(value)) => {
                    if self.evaluate(value) {
                        return Outcome::Satisfied;
                    }
                }
                Ok(None) => return Outcome::Timeout,
                Err(error) => return Outcome::Failed(error),
            }

            let now = Instant::now();
            if now >= self.deadline {
                return Outcome::Timeout;
            }
            let wake = (now + self.poll_interval).min(self.deadline);
            tokio::time::sleep_until(wake).await;
        }
    }

    // Reads the path, retrying failed reads with linear backoff.
    //
    // Returns `Ok(None)` when a read hangs past the hard deadline.
    async fn sample(&mut self) -> Result<Option<TypedValue>, TransportError> {
        let mut attempt = 0;
        loop {
            let read = self.source.get(&self.spec.path);
            let error = match tokio::time::timeout_at(self.hard_deadline, read)
                .await
            {
                Ok(Ok(value)) => return Ok(Some(value)),
                Ok(Err(error)) => error,
                Err(_) => return Ok(None),
            };

            attempt += 1;
            if attempt > self.config.retry.attempts
                || !self.backoff(&error, attempt).await
            {
                return Err(error);
            }
            self.last_error = Some(error);
        }
    }

    // Waits before the given retry attempt. Returns `false` if the hard
    // deadline leaves no room for another attempt.
    async fn backoff(&self, error: &TransportError, attempt: u32) -> bool {
        let backoff = self.config.retry.backoff(attempt);
        Debug::TransportRetry(error, attempt, backoff).log();
        let wake = Instant::now() + backoff;
        if wake >= self.hard_deadline {
            return false;
        }
        tokio::time::sleep_until(wake).await;
        true
    }

    fn evaluate(&mut self, value: TypedValue) -> bool {
        self.samples += 1;
        Debug::WatchSample(&self.spec.path, self.samples, &value).log();
        if value.kind() != self.spec.path.kind() {
            warn!(
                path = %self.spec.path,
                expected = %self.spec.path.kind(),
                received = %value.kind(),
                "sampled value has unexpected kind"
            );
        }
        let satisfied = self.spec.predicate.eval(&value);
        self.last_value = Some(value);
        self.last_error = None;
        satisfied
    }
}

// ===== global functions =====

// Watches a single path until the predicate holds, a persistent read error
// occurs, the timeout expires or the token is cancelled.
//
// Only a malformed spec is an error; every other outcome is reported
// through the returned `WatchResult`.
pub async fn watch(
    source: &dyn TelemetrySource,
    spec: &WatchSpec,
    config: &Config,
    cancel: &CancelToken,
) -> Result<WatchResult, Error> {
    spec.validate()?;
    Ok(watch_validated(source, spec, config, cancel).await)
}

pub(crate) async fn watch_validated(
    source: &dyn TelemetrySource,
    spec: &WatchSpec,
    config: &Config,
    cancel: &CancelToken,
) -> WatchResult {
    Watcher::new(source, spec, config).run(cancel).await
}

// Evaluates all watches concurrently, one task per watch.
//
// Results are returned in the order of `specs`. Returns once every watch has
// resolved, which is at the latest when the longest timeout expires.
pub async fn watch_all(
    source: Arc<dyn TelemetrySource>,
    specs: &[WatchSpec],
    config: &Config,
    cancel: &CancelToken,
) -> Result<Vec<WatchResult>, Error> {
    for spec in specs {
        spec.validate()?;
    }
    Ok(watch_all_validated(source, specs, config, cancel).await)
}

pub(crate) async fn watch_all_validated(
    source: Arc<dyn TelemetrySource>,
    specs: &[WatchSpec],
    config: &Config,
    cancel: &CancelToken,
) -> Vec<WatchResult> {
    let tasks = specs
        .iter()
        .map(|spec| {
            let source = source.clone();
            let spec = spec.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let span = debug_span!("watch-task", path = %spec.path);
            Task::spawn(
                async move {
                    watch_validated(source.as_ref(), &spec, &config, &cancel)
                        .await
                }
                .instrument(span),
            )
        })
        .collect::<Vec<_>>();

    task::join_all(tasks)
        .await
        .into_iter()
        .zip(specs)
        .map(|(result, spec)| match result {
            Ok(result) => result,
            Err(error) if error.is_panic() => {
                std::panic::resume_unwind(error.into_panic())
            }
            // Aborted from outside.
            Err(_) => WatchResult {
                path: spec.path.clone(),
                satisfied: false,
                last_value: None,
                elapsed: Duration::ZERO,
                samples_taken: 0,
                error: None,
                cancelled: true,
            },
        })
        .collect()
}

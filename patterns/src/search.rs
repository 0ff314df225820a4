// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Search for patterns by repeatedly querying `verifyta`.
//!
//! A single search instruments the model with the signal templates of
//! [`crate::monitor`], asks one query and turns its witness into a pattern.
//! An exhaustive search works in rounds: each round adds a monitor for every
//! pattern found so far, asks the query with all monitors ruled out (once
//! per diagnostic trace kind), and merges the new patterns. It ends when the verifier proves nothing else is
//! reachable, when enough patterns were found, or after a number of rounds
//! in a row that turned up nothing new.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use actions::{TimedActions, DEFAULT_CLOCK};
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;
use tracer::{Extractor, TraceError};
use verifyta::{
    artifacts::Artifacts, run_commands, CommandResult, DiagnosticTrace, ExecutionMode,
    VerifierCmd, VerifierConf, VerifierError,
};

use crate::{
    monitor::{Instrument, Instrumentation, XmlModel},
    query::Query,
    verdict::{classify, failure_error, Verdict},
};

#[derive(Error, Debug)]
/// An error from a pattern search
pub enum SearchError {
    /// The verifier proved that no run matches the query
    #[error("no pattern satisfies {query}")]
    NoPatternFound {
        /// The query that was checked
        query: String,
    },
    /// Patterns can only be ruled out of `E<>` queries
    #[error("cannot rule out patterns in {query}: only E<> queries can be restricted")]
    UnsupportedQuery {
        /// The query that was given
        query: String,
    },
    /// The model could not be instrumented
    #[error("cannot instrument {}: {message}", model.display())]
    Instrument {
        /// The model being searched
        model: PathBuf,
        /// What about the model was not understood
        message: String,
    },
    /// The verifier could not be run or gave no answer
    #[error(transparent)]
    Verifier(#[from] VerifierError),
    /// A witness could not be read
    #[error(transparent)]
    Trace(#[from] TraceError),
    /// I/O went wrong
    #[error("some I/O went wrong: {0}")]
    Io(#[from] io::Error),
}

/// The signals a pattern must be consistent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRequest {
    /// Input signal the model receives
    pub inputs: TimedActions,
    /// Signal observed from the model
    pub observes: TimedActions,
    /// Actions considered observable, `None` for no restriction
    pub observe_actions: Option<Vec<String>>,
    /// Actions kept in the reported pattern, `None` to keep all of them
    pub focused_actions: Option<Vec<String>>,
}

impl PatternRequest {
    /// A request with no alphabet restriction or focus.
    pub fn new(inputs: TimedActions, observes: TimedActions) -> Self {
        Self {
            inputs,
            observes,
            observe_actions: None,
            focused_actions: None,
        }
    }

    /// Restrict the observable alphabet.
    pub fn observe_actions<I: IntoIterator<Item = S>, S: Into<String>>(mut self, actions: I) -> Self {
        self.observe_actions = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    /// Report only these actions.
    pub fn focused_actions<I: IntoIterator<Item = S>, S: Into<String>>(mut self, actions: I) -> Self {
        self.focused_actions = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    /// The templates that make a run consistent with this request
    /// reachable.
    pub fn instrumentation(&self, clock: &str) -> Instrumentation {
        Instrumentation::new(clock).signals(
            &self.inputs,
            &self.observes,
            self.observe_actions.as_deref(),
        )
    }

    /// The query asking for a run consistent with this request.
    pub fn query(&self, clock: &str) -> Query {
        self.instrumentation(clock).goal()
    }
}

/// Knobs for a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Keep query files, witnesses and intermediate files next to the model
    pub hold: bool,
    /// Extra arguments passed to every `verifyta` run
    pub options: Vec<String>,
    /// Diagnostic trace kinds to ask for (`-t`). A single search uses the
    /// first one; by default shortest for a single search and all three for
    /// an exhaustive one.
    pub diagnostics: Option<Vec<DiagnosticTrace>>,
    /// How the runs of one round are executed
    pub mode: ExecutionMode,
    /// Worker count for the parallel modes
    pub pool_size: Option<usize>,
    /// Rounds in a row without a new pattern before giving up
    pub max_stale: usize,
    /// Reference clock for pattern intervals
    pub clock: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            hold: false,
            options: vec![],
            diagnostics: None,
            mode: ExecutionMode::Sequential,
            pool_size: None,
            max_stale: 3,
            clock: DEFAULT_CLOCK.to_string(),
        }
    }
}

/// A pattern together with the query whose witness produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discovered {
    /// Query text, including exclusions of earlier patterns
    pub query: Query,
    /// The pattern read from the witness
    pub pattern: TimedActions,
}

impl fmt::Display for Discovered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Init,
    Querying,
    Extracting,
    Refining,
    Found,
    Exhausted,
    Failed,
}

/// One prepared `verifyta` run.
struct Invocation {
    // keeps scoped artifacts alive until the witness is read
    artifacts: Artifacts,
    cmd: VerifierCmd,
    model: PathBuf,
    witness: PathBuf,
}

/// The model a round runs on: the original one, or an instrumented copy.
struct Instrumented {
    _artifacts: Option<Artifacts>,
    path: PathBuf,
}

/// The actions monitors follow: the focused ones if any, otherwise every
/// action that is observable or appears in a found pattern.
fn exclusion_alphabet(
    focused: Option<&[String]>,
    observable: Option<&[String]>,
    found: &[Discovered],
) -> Vec<String> {
    match focused {
        Some(focused) => focused.to_vec(),
        None => observable
            .into_iter()
            .flatten()
            .chain(found.iter().flat_map(|d| d.pattern.actions()))
            .cloned()
            .sorted()
            .dedup()
            .collect(),
    }
}

/// What one run contributed to a round.
enum Outcome {
    Pattern(TimedActions),
    Unsatisfied,
    Failed(SearchError),
}

/// Pattern searches on one model.
#[derive(Debug, Clone)]
pub struct PatternSearch<'a> {
    conf: &'a VerifierConf,
    model: PathBuf,
    options: SearchOptions,
    instrument: Arc<dyn Instrument>,
}

impl<'a> PatternSearch<'a> {
    /// Searches on `model` with the given options.
    pub fn new<P: AsRef<Path>>(conf: &'a VerifierConf, model: P, options: SearchOptions) -> Self {
        Self {
            conf,
            model: model.as_ref().to_path_buf(),
            options,
            instrument: Arc::new(XmlModel),
        }
    }

    /// Use `instrument` to add templates to the model instead of editing
    /// UPPAAL XML.
    pub fn with_instrument(mut self, instrument: Arc<dyn Instrument>) -> Self {
        self.instrument = instrument;
        self
    }

    fn phase(&self, phase: Phase) {
        log::debug!("search on {}: {phase:?}", self.model.display());
    }

    fn artifact_dir(&self) -> &Path {
        match self.model.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn instrumented(&self, plan: &Instrumentation) -> Result<Instrumented, SearchError> {
        if plan.is_empty() {
            return Ok(Instrumented {
                _artifacts: None,
                path: self.model.clone(),
            });
        }
        let text = fs::read_to_string(&self.model)?;
        let text = self
            .instrument
            .instrument(&text, plan)
            .map_err(|message| SearchError::Instrument {
                model: self.model.clone(),
                message,
            })?;
        let artifacts = Artifacts::new(self.options.hold, self.artifact_dir(), "model")?;
        let ext = self
            .model
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("xml");
        let path = artifacts.file(ext);
        artifacts.write(&path, &text)?;
        log::debug!("instrumented {} as {}", self.model.display(), path.display());
        Ok(Instrumented {
            _artifacts: Some(artifacts),
            path,
        })
    }

    fn prepare(
        &self,
        query: &Query,
        kind: DiagnosticTrace,
        model: &Path,
    ) -> Result<Invocation, SearchError> {
        let artifacts = Artifacts::new(self.options.hold, self.artifact_dir(), "query")?;
        let query_path = artifacts.file("q");
        artifacts.write(&query_path, query.as_str())?;
        let format = self.conf.trace_format();
        let prefix = artifacts.prefix(&format!("t{}", kind.flag_value()));
        let mut cmd = self.conf.command(["-t", kind.flag_value(), format.flag()]);
        cmd.arg(&prefix)
            .args(&self.options.options)
            .arg(model)
            .arg(&query_path);
        Ok(Invocation {
            artifacts,
            cmd,
            model: model.to_path_buf(),
            witness: format.witness_path(&prefix),
        })
    }

    fn extract(
        &self,
        invocation: &Invocation,
        focused: Option<&[String]>,
    ) -> Result<TimedActions, SearchError> {
        self.phase(Phase::Extracting);
        let trace = Extractor::new(self.conf)
            .clock(&self.options.clock)
            .hold(self.options.hold)
            .extract(&invocation.model, &invocation.witness)?;
        Ok(trace.focus(focused).to_timed_actions())
    }

    fn outcome(
        &self,
        invocation: &Invocation,
        result: CommandResult,
        focused: Option<&[String]>,
    ) -> Outcome {
        if let (true, Ok(out)) = (invocation.artifacts.is_held(), &result.outcome) {
            let log_path = invocation.artifacts.file("log");
            if let Err(err) = invocation.artifacts.write(&log_path, &out.combined()) {
                log::warn!("could not keep {}: {err}", log_path.display());
            }
        }
        match classify(&result) {
            Verdict::Satisfied => match self.extract(invocation, focused) {
                Ok(pattern) => Outcome::Pattern(pattern),
                Err(err) => Outcome::Failed(err),
            },
            Verdict::NotSatisfied => Outcome::Unsatisfied,
            Verdict::Failure(message) => {
                log::debug!("`{}` failed: {message}", result.command);
                Outcome::Failed(failure_error(result, message).into())
            }
        }
    }

    fn find_one_in(
        &self,
        plan: &Instrumentation,
        query: &Query,
        focused: Option<&[String]>,
    ) -> Result<Discovered, SearchError> {
        self.phase(Phase::Init);
        let kind = self
            .options
            .diagnostics
            .as_ref()
            .and_then(|kinds| kinds.first().copied())
            .unwrap_or(DiagnosticTrace::Shortest);
        let model = self.instrumented(plan)?;
        let invocation = self.prepare(query, kind, &model.path)?;
        self.phase(Phase::Querying);
        let result = CommandResult::of(&invocation.cmd, self.conf.timeout());
        match self.outcome(&invocation, result, focused) {
            Outcome::Pattern(pattern) => {
                self.phase(Phase::Found);
                log::info!("found pattern {pattern}");
                Ok(Discovered {
                    query: query.clone(),
                    pattern,
                })
            }
            Outcome::Unsatisfied => {
                self.phase(Phase::Exhausted);
                Err(SearchError::NoPatternFound {
                    query: query.to_string(),
                })
            }
            Outcome::Failed(err) => {
                self.phase(Phase::Failed);
                Err(err)
            }
        }
    }

    /// Ask `query` once on the model as is and read a pattern from its
    /// witness.
    pub fn find_one_with_query(
        &self,
        query: &Query,
        focused: Option<&[String]>,
    ) -> Result<Discovered, SearchError> {
        let plan = Instrumentation::new(&self.options.clock);
        self.find_one_in(&plan, query, focused)
    }

    /// Find one pattern consistent with `request`.
    pub fn find_one(&self, request: &PatternRequest) -> Result<Discovered, SearchError> {
        let plan = request.instrumentation(&self.options.clock);
        self.find_one_in(&plan, &plan.goal(), request.focused_actions.as_deref())
    }

    fn find_all_in(
        &self,
        plan: &Instrumentation,
        query: &Query,
        focused: Option<&[String]>,
        max_patterns: Option<usize>,
    ) -> Result<Vec<Discovered>, SearchError> {
        self.phase(Phase::Init);
        if !query.is_reachability() {
            return Err(SearchError::UnsupportedQuery {
                query: query.to_string(),
            });
        }
        let kinds = self
            .options
            .diagnostics
            .clone()
            .filter(|kinds| !kinds.is_empty())
            .unwrap_or_else(|| DiagnosticTrace::ALL.to_vec());
        let max_patterns = max_patterns.unwrap_or(usize::MAX);
        let mut found: Vec<Discovered> = vec![];
        let mut stale_rounds = 0;
        while found.len() < max_patterns {
            let alphabet =
                exclusion_alphabet(focused, plan.observe_alphabet.as_deref(), &found);
            let round_plan =
                plan.excluding(found.iter().map(|d| d.pattern.to_pattern()), &alphabet);
            let round_query = query.excluding(round_plan.monitors()).ok_or_else(|| {
                SearchError::UnsupportedQuery {
                    query: query.to_string(),
                }
            })?;
            let model = self.instrumented(&round_plan)?;
            let invocations = kinds
                .iter()
                .map(|&kind| self.prepare(&round_query, kind, &model.path))
                .collect::<Result<Vec<_>, _>>()?;
            let cmds: Vec<VerifierCmd> = invocations.iter().map(|inv| inv.cmd.clone()).collect();
            self.phase(Phase::Querying);
            let results = run_commands(
                &cmds,
                self.options.mode,
                self.options.pool_size,
                self.conf.timeout(),
            );

            let mut new_patterns = 0;
            let mut unsatisfied = false;
            let mut first_error = None;
            let mut failures = 0;
            for (invocation, result) in invocations.iter().zip(results) {
                match self.outcome(invocation, result, focused) {
                    Outcome::Pattern(pattern) => {
                        if found.len() >= max_patterns
                            || found
                                .iter()
                                .any(|d| d.pattern.to_pattern() == pattern.to_pattern())
                        {
                            continue;
                        }
                        log::info!("found pattern {pattern}");
                        found.push(Discovered {
                            query: round_query.clone(),
                            pattern,
                        });
                        new_patterns += 1;
                    }
                    Outcome::Unsatisfied => unsatisfied = true,
                    Outcome::Failed(err) => {
                        failures += 1;
                        first_error.get_or_insert(err);
                    }
                }
            }
            if failures == invocations.len() {
                if let Some(err) = first_error {
                    if found.is_empty() {
                        self.phase(Phase::Failed);
                        return Err(err);
                    }
                    log::warn!(
                        "every run failed after {} patterns, stopping: {err}",
                        found.len()
                    );
                    self.phase(Phase::Failed);
                    return Ok(found);
                }
            } else if let Some(err) = first_error {
                log::warn!("{failures} of {} runs failed this round: {err}", invocations.len());
            }

            if new_patterns > 0 {
                stale_rounds = 0;
            } else if unsatisfied {
                break;
            } else {
                stale_rounds += 1;
                if stale_rounds >= self.options.max_stale {
                    log::debug!("no new pattern in {stale_rounds} rounds, stopping");
                    break;
                }
            }
            self.phase(Phase::Refining);
        }
        self.phase(if found.is_empty() {
            Phase::Exhausted
        } else {
            Phase::Found
        });
        Ok(found)
    }

    /// Enumerate distinct patterns for `query` on the model as is, at most
    /// `max_patterns` of them (`None` for no limit). `query` must be an
    /// `E<>` query so that found patterns can be ruled out.
    pub fn find_all_with_query(
        &self,
        query: &Query,
        focused: Option<&[String]>,
        max_patterns: Option<usize>,
    ) -> Result<Vec<Discovered>, SearchError> {
        let plan = Instrumentation::new(&self.options.clock);
        self.find_all_in(&plan, query, focused, max_patterns)
    }

    /// Enumerate distinct patterns consistent with `request`.
    pub fn find_all(
        &self,
        request: &PatternRequest,
        max_patterns: Option<usize>,
    ) -> Result<Vec<Discovered>, SearchError> {
        let plan = request.instrumentation(&self.options.clock);
        self.find_all_in(
            &plan,
            &plan.goal(),
            request.focused_actions.as_deref(),
            max_patterns,
        )
    }
}

/// Find one pattern on `model` consistent with `request`.
pub fn find_pattern<P: AsRef<Path>>(
    conf: &VerifierConf,
    model: P,
    request: &PatternRequest,
    options: SearchOptions,
) -> Result<Discovered, SearchError> {
    PatternSearch::new(conf, model, options).find_one(request)
}

/// Find up to `max_patterns` distinct patterns on `model` consistent with
/// `request`.
pub fn find_all_patterns<P: AsRef<Path>>(
    conf: &VerifierConf,
    model: P,
    request: &PatternRequest,
    max_patterns: Option<usize>,
    options: SearchOptions,
) -> Result<Vec<Discovered>, SearchError> {
    PatternSearch::new(conf, model, options).find_all(request, max_patterns)
}

/// Find one pattern on `model` from a caller-written query.
pub fn find_pattern_with_query<P: AsRef<Path>>(
    conf: &VerifierConf,
    model: P,
    query: &str,
    focused_actions: Option<&[String]>,
    options: SearchOptions,
) -> Result<Discovered, SearchError> {
    PatternSearch::new(conf, model, options)
        .find_one_with_query(&Query::raw(query), focused_actions)
}

/// Find up to `max_patterns` distinct patterns on `model` from a
/// caller-written query.
pub fn find_all_patterns_with_query<P: AsRef<Path>>(
    conf: &VerifierConf,
    model: P,
    query: &str,
    focused_actions: Option<&[String]>,
    max_patterns: Option<usize>,
    options: SearchOptions,
) -> Result<Vec<Discovered>, SearchError> {
    PatternSearch::new(conf, model, options).find_all_with_query(
        &Query::raw(query),
        focused_actions,
        max_patterns,
    )
}

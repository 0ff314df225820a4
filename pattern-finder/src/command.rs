// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The pattern-finder binary's command-line interface.

use std::{fmt::Display, path::PathBuf, process};

use actions::{TimedActions, DEFAULT_CLOCK, UNCONSTRAINED};
use clap::Args;
use patterns::{Discovered, PatternRequest, PatternSearch, Query, SearchOptions};
use serde_json::json;
use tabled::settings::{object::Columns, Alignment, Modify, Style};
use tracer::Extractor;
use verifyta::{
    conf::split_words, run_command, run_commands, verify, CommandResult, DiagnosticTrace,
    ExecutionMode, TraceFormat, VerifierConf,
};

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum Parallel {
    /// One run after another
    Sequential,
    /// A pool of child processes supervised from one thread
    Process,
    /// A pool of threads, each waiting on one child
    Thread,
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum Diagnostic {
    Some,
    Shortest,
    Fastest,
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum WitnessFormat {
    Xml,
    Xtr,
}

#[derive(Args, Clone, Debug, PartialEq, Eq)]
struct DispatchArgs {
    #[arg(value_enum, long, default_value_t = Parallel::Sequential)]
    /// How to run independent verifier invocations
    parallel: Parallel,

    #[arg(long)]
    /// Number of workers (default: cores for processes, twice that for
    /// threads)
    pool_size: Option<usize>,
}

impl DispatchArgs {
    fn mode(&self) -> ExecutionMode {
        match self.parallel {
            Parallel::Sequential => ExecutionMode::Sequential,
            Parallel::Process => ExecutionMode::ProcessPool,
            Parallel::Thread => ExecutionMode::ThreadPool,
        }
    }
}

/// A timed action given on the command line as `label[:lb[:ub]]`, where a
/// missing or empty bound is unconstrained.
#[derive(Clone, Debug, PartialEq, Eq)]
struct TimedAction {
    action: String,
    lb: i64,
    ub: i64,
}

fn parse_bound(s: Option<&str>) -> Result<i64, String> {
    match s {
        None | Some("") => Ok(UNCONSTRAINED),
        Some(s) => s
            .parse()
            .map_err(|err| format!("could not parse bound {s:?}: {err}")),
    }
}

fn parse_timed_action(s: &str) -> Result<TimedAction, String> {
    let mut parts = s.split(':');
    let action = parts.next().unwrap_or_default().trim();
    if action.is_empty() {
        return Err(format!("missing action label in {s:?}"));
    }
    let lb = parse_bound(parts.next())?;
    let ub = parse_bound(parts.next())?;
    if parts.next().is_some() {
        return Err(format!("expected label[:lb[:ub]], got {s:?}"));
    }
    Ok(TimedAction {
        action: action.to_string(),
        lb,
        ub,
    })
}

fn to_timed_actions(items: &[TimedAction]) -> TimedActions {
    let result = TimedActions::new(
        items.iter().map(|a| a.action.clone()),
        Some(items.iter().map(|a| a.lb).collect()),
        Some(items.iter().map(|a| a.ub).collect()),
    );
    // one bound of each kind per item
    result.unwrap_or_else(|err| fail(err))
}

#[derive(Args, Clone, Debug, PartialEq, Eq)]
struct SearchArgs {
    /// Model (.xml) to search
    model: PathBuf,

    #[arg(long)]
    /// Keep query files, witnesses and intermediate files next to the model
    hold: bool,

    #[arg(long, allow_hyphen_values = true)]
    /// Extra verifyta options, as a single string
    options: Option<String>,

    #[arg(value_enum, long)]
    /// Diagnostic trace kinds to request (repeatable)
    diagnostic: Vec<Diagnostic>,

    #[arg(value_enum, long, default_value_t = WitnessFormat::Xml)]
    /// Format verifyta writes witnesses in
    witness_format: WitnessFormat,

    #[command(flatten)]
    dispatch: DispatchArgs,

    #[arg(long, default_value_t = 3)]
    /// Rounds without a new pattern before an exhaustive search stops
    max_stale: usize,

    #[arg(long, default_value = DEFAULT_CLOCK)]
    /// Reference clock for pattern intervals
    clock: String,

    #[arg(long = "focus")]
    /// Only report these actions (repeatable; default: all)
    focused: Vec<String>,
}

impl SearchArgs {
    fn options(&self) -> SearchOptions {
        let options = match &self.options {
            Some(s) => split_words(s).unwrap_or_else(|err| fail(err)),
            None => vec![],
        };
        let diagnostics = (!self.diagnostic.is_empty()).then(|| {
            self.diagnostic
                .iter()
                .map(|d| match d {
                    Diagnostic::Some => DiagnosticTrace::Some,
                    Diagnostic::Shortest => DiagnosticTrace::Shortest,
                    Diagnostic::Fastest => DiagnosticTrace::Fastest,
                })
                .collect()
        });
        SearchOptions {
            hold: self.hold,
            options,
            diagnostics,
            mode: self.dispatch.mode(),
            pool_size: self.dispatch.pool_size,
            max_stale: self.max_stale,
            clock: self.clock.clone(),
        }
    }

    fn focused(&self) -> Option<&[String]> {
        (!self.focused.is_empty()).then_some(self.focused.as_slice())
    }

    fn trace_format(&self) -> TraceFormat {
        match self.witness_format {
            WitnessFormat::Xml => TraceFormat::Xml,
            WitnessFormat::Xtr => TraceFormat::Xtr,
        }
    }
}

#[derive(Args, Clone, Debug, PartialEq, Eq)]
struct SignalArgs {
    #[arg(long = "input", value_parser = parse_timed_action)]
    /// Input signal, one `label[:lb[:ub]]` per occurrence
    inputs: Vec<TimedAction>,

    #[arg(long = "observe", value_parser = parse_timed_action)]
    /// Observed signal, one `label[:lb[:ub]]` per occurrence
    observes: Vec<TimedAction>,

    #[arg(long = "observable")]
    /// Actions considered observable (repeatable; default: no restriction)
    observe_actions: Vec<String>,
}

impl SignalArgs {
    fn request(&self, focused: Option<&[String]>) -> PatternRequest {
        PatternRequest {
            inputs: to_timed_actions(&self.inputs),
            observes: to_timed_actions(&self.observes),
            observe_actions: (!self.observe_actions.is_empty())
                .then(|| self.observe_actions.clone()),
            focused_actions: focused.map(<[String]>::to_vec),
        }
    }
}

#[derive(clap::Subcommand, Clone, Debug, PartialEq, Eq)]
enum Command {
    /// Check models and save the shortest witness of each to a trace file
    /// (.xtr or .xml).
    Verify {
        #[arg(long = "model", required = true)]
        /// Model to check (repeatable)
        models: Vec<PathBuf>,
        #[arg(long = "trace", required = true)]
        /// Trace file to write, one per model
        traces: Vec<PathBuf>,
        #[command(flatten)]
        dispatch: DispatchArgs,
    },
    /// Print the timed trace read from a witness.
    Trace {
        /// Model the witness was produced from
        model: PathBuf,
        /// Witness file (.xtr or .xml)
        trace: PathBuf,
        #[arg(long)]
        /// Keep the intermediate .if and .txt files
        hold: bool,
        #[arg(long, default_value = DEFAULT_CLOCK)]
        /// Reference clock for the intervals
        clock: String,
        #[arg(long = "focus")]
        /// Only show these actions (repeatable; default: all)
        focused: Vec<String>,
    },
    /// Run verifyta once with the given argument string.
    Run {
        #[arg(allow_hyphen_values = true)]
        /// Arguments, as a single string
        args: String,
    },
    /// Run verifyta several times, each with one argument string.
    RunMany {
        #[arg(required = true, allow_hyphen_values = true)]
        /// Argument strings, one per run
        commands: Vec<String>,
        #[command(flatten)]
        dispatch: DispatchArgs,
    },
    /// Find one pattern consistent with the given signals.
    Find {
        #[command(flatten)]
        search: SearchArgs,
        #[command(flatten)]
        signals: SignalArgs,
    },
    /// Enumerate patterns consistent with the given signals.
    FindAll {
        #[command(flatten)]
        search: SearchArgs,
        #[command(flatten)]
        signals: SignalArgs,
        #[arg(long)]
        /// Stop after this many patterns (default: until exhausted)
        max_patterns: Option<usize>,
    },
    /// Find one pattern from a hand-written query.
    FindQuery {
        #[command(flatten)]
        search: SearchArgs,
        #[arg(long)]
        /// Query text
        query: String,
    },
    /// Enumerate patterns from a hand-written query.
    FindAllQuery {
        #[command(flatten)]
        search: SearchArgs,
        #[arg(long)]
        /// Query text
        query: String,
        #[arg(long)]
        /// Stop after this many patterns (default: until exhausted)
        max_patterns: Option<usize>,
    },
}

#[derive(clap::Parser, Debug)]
#[command(about, long_about=None)]
/// Entrypoint for the pattern-finder binary, including all commands.
pub struct App {
    #[arg(long, default_value = "verifyta", global = true)]
    /// Path to UPPAAL's verifyta
    verifyta: PathBuf,

    #[arg(long, global = true)]
    /// Path to UPPAAL's tracer (default: next to verifyta)
    tracer: Option<PathBuf>,

    #[arg(long, default_value = "600s", global = true)]
    /// Timeout for each verifier run
    timeout: humantime::Duration,

    #[arg(long, global = true)]
    /// Output results as JSON lines
    json: bool,

    #[command(subcommand)]
    /// Command to run
    command: Command,
}

fn fail<E: Display>(err: E) -> ! {
    eprintln!("{err}");
    process::exit(1)
}

fn print_results(results: &[CommandResult], json: bool) {
    if json {
        for r in results {
            let value = match &r.outcome {
                Ok(out) => json!({
                    "command": r.command,
                    "success": r.success(),
                    "output": out,
                }),
                Err(err) => json!({
                    "command": r.command,
                    "success": false,
                    "error": err.to_string(),
                }),
            };
            println!("{value}");
        }
        return;
    }
    let mut rows = vec![vec![
        "#".to_string(),
        "command".to_string(),
        "outcome".to_string(),
        "time (s)".to_string(),
    ]];
    rows.extend(results.iter().enumerate().map(|(i, r)| {
        let (outcome, time) = match &r.outcome {
            Ok(out) if out.timed_out => ("timeout".to_string(), out.elapsed),
            Ok(out) => match out.status {
                Some(0) => ("ok".to_string(), out.elapsed),
                Some(code) => (format!("exit {code}"), out.elapsed),
                None => ("killed".to_string(), out.elapsed),
            },
            Err(err) => (err.to_string(), Default::default()),
        };
        vec![
            i.to_string(),
            r.command.clone(),
            outcome,
            format!("{:0.1}", time.as_secs_f64()),
        ]
    }));
    let mut table = tabled::builder::Builder::from(rows).build();
    table
        .with(Style::rounded())
        .with(Modify::new(Columns::single(3)).with(Alignment::right()));
    println!("{table}");
}

fn print_discovered(found: &[Discovered], json: bool) {
    if json {
        for d in found {
            println!(
                "{}",
                serde_json::to_string(d).expect("could not serialize pattern")
            );
        }
        return;
    }
    println!("{}", render_discovered(found));
}

fn render_discovered(found: &[Discovered]) -> String {
    let mut rows = vec![vec!["#".to_string(), "pattern".to_string()]];
    rows.extend(
        found
            .iter()
            .enumerate()
            .map(|(i, d)| vec![i.to_string(), d.pattern.to_string()]),
    );
    let mut table = tabled::builder::Builder::from(rows).build();
    table.with(Style::rounded());
    table.to_string()
}

impl App {
    fn conf(&self) -> VerifierConf {
        log::debug!("using verifier {}", self.verifyta.display());
        let conf = VerifierConf::new(&self.verifyta)
            .unwrap_or_else(|err| fail(err))
            .with_timeout(Some(self.timeout.into()));
        match &self.tracer {
            Some(tracer) => conf.with_tracer(tracer),
            None => conf,
        }
    }

    /// Run the application.
    pub fn exec(self) {
        let conf = self.conf();
        match &self.command {
            Command::Verify {
                models,
                traces,
                dispatch,
            } => {
                let results = verify(
                    &conf,
                    models.as_slice(),
                    traces.as_slice(),
                    dispatch.mode(),
                    dispatch.pool_size,
                )
                .unwrap_or_else(|err| fail(err));
                print_results(&results, self.json);
                if !results.iter().all(CommandResult::success) {
                    process::exit(1);
                }
            }
            Command::Trace {
                model,
                trace,
                hold,
                clock,
                focused,
            } => {
                let timed = Extractor::new(&conf)
                    .clock(clock)
                    .hold(*hold)
                    .extract(model, trace)
                    .unwrap_or_else(|err| fail(err));
                let focused = (!focused.is_empty()).then_some(focused.as_slice());
                let timed = timed.focus(focused);
                if self.json {
                    println!(
                        "{}",
                        serde_json::to_string(&timed).expect("could not serialize trace")
                    );
                } else {
                    println!("{timed}");
                }
            }
            Command::Run { args } => {
                let out = run_command(&conf, args).unwrap_or_else(|err| fail(err));
                if self.json {
                    println!("{}", json!(out));
                } else {
                    print!("{}", out.stdout);
                    eprint!("{}", out.stderr);
                }
                if !out.success() {
                    process::exit(1);
                }
            }
            Command::RunMany { commands, dispatch } => {
                let cmds: Vec<_> = commands
                    .iter()
                    .map(|s| conf.command(split_words(s).unwrap_or_else(|err| fail(err))))
                    .collect();
                let results =
                    run_commands(&cmds, dispatch.mode(), dispatch.pool_size, conf.timeout());
                print_results(&results, self.json);
                if !results.iter().all(CommandResult::success) {
                    process::exit(1);
                }
            }
            Command::Find { search, signals } => {
                let conf = conf.with_trace_format(search.trace_format());
                let request = signals.request(search.focused());
                let found = PatternSearch::new(&conf, &search.model, search.options())
                    .find_one(&request)
                    .unwrap_or_else(|err| fail(err));
                print_one(&found, self.json);
            }
            Command::FindAll {
                search,
                signals,
                max_patterns,
            } => {
                let conf = conf.with_trace_format(search.trace_format());
                let request = signals.request(search.focused());
                let found = PatternSearch::new(&conf, &search.model, search.options())
                    .find_all(&request, *max_patterns)
                    .unwrap_or_else(|err| fail(err));
                log::info!("found {} patterns", found.len());
                print_discovered(&found, self.json);
            }
            Command::FindQuery { search, query } => {
                let conf = conf.with_trace_format(search.trace_format());
                let found = PatternSearch::new(&conf, &search.model, search.options())
                    .find_one_with_query(&Query::raw(query.as_str()), search.focused())
                    .unwrap_or_else(|err| fail(err));
                print_one(&found, self.json);
            }
            Command::FindAllQuery {
                search,
                query,
                max_patterns,
            } => {
                let conf = conf.with_trace_format(search.trace_format());
                let found = PatternSearch::new(&conf, &search.model, search.options())
                    .find_all_with_query(
                        &Query::raw(query.as_str()),
                        search.focused(),
                        *max_patterns,
                    )
                    .unwrap_or_else(|err| fail(err));
                print_discovered(&found, self.json);
            }
        }
    }
}

fn print_one(found: &Discovered, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string(found).expect("could not serialize pattern")
        );
    } else {
        println!("query:   {}", found.query);
        println!("pattern: {}", found.pattern);
    }
}

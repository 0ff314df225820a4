// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Instrument a model so that patterns can be asked for with plain
//! reachability queries.
//!
//! Searching for a pattern adds up to three kinds of templates to the model:
//!
//! - `PatternInput` sends the input signal, each action `a!` within its
//!   interval of the monitor clock, and ends in `PatternInput.done`.
//! - `PatternObserver` receives the observed signal (`o?`) in order and ends
//!   in `PatternObserver.pass`. With an observable alphabet, receiving any
//!   other action of the alphabet first leads to `PatternObserver.fail`.
//! - `PatternMonitor<k>` follows the `k`-th already found pattern over the
//!   exclusion alphabet and is in `PatternMonitor<k>.pass` exactly when the
//!   actions seen so far spell that pattern.
//!
//! Asking for a new pattern is then `E<> PatternObserver.pass &&
//! !PatternMonitor0.pass && ...`. Since listeners must not block the model,
//! every observed or excluded action has to be a `broadcast chan`.

use std::fmt::{self, Write};

use actions::TimedActions;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use crate::query::Query;

/// Template sending the input signal.
pub const INPUT_TEMPLATE: &str = "PatternInput";
/// Template receiving the observed signal.
pub const OBSERVER_TEMPLATE: &str = "PatternObserver";
/// Prefix of the templates ruling out found patterns.
pub const MONITOR_TEMPLATE: &str = "PatternMonitor";

/// The templates to add to a model for one query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instrumentation {
    /// Clock the signal intervals are written against
    pub clock: String,
    /// Input signal, if any
    pub inputs: Option<TimedActions>,
    /// Observed signal, if any
    pub observes: Option<TimedActions>,
    /// Actions the observer reacts to, `None` for just the observed ones
    pub observe_alphabet: Option<Vec<String>>,
    /// Patterns to rule out, one monitor each
    pub excluded: Vec<Vec<String>>,
    /// Actions the monitors follow
    pub exclusion_alphabet: Vec<String>,
}

impl Instrumentation {
    /// No templates, with signals timed against `clock`.
    pub fn new<S: Into<String>>(clock: S) -> Self {
        Self {
            clock: clock.into(),
            ..Default::default()
        }
    }

    /// Drive the model with `inputs` and expect `observes`. Empty signals
    /// add no template.
    pub fn signals(
        mut self,
        inputs: &TimedActions,
        observes: &TimedActions,
        alphabet: Option<&[String]>,
    ) -> Self {
        self.inputs = (!inputs.is_empty()).then(|| inputs.clone());
        self.observes = (!observes.is_empty()).then(|| observes.clone());
        self.observe_alphabet = alphabet.map(<[String]>::to_vec);
        self
    }

    /// These templates plus one monitor per pattern in `found`, following
    /// `alphabet`.
    pub fn excluding<I, P, S>(&self, found: I, alphabet: &[String]) -> Self
    where
        I: IntoIterator<Item = P>,
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut plan = self.clone();
        plan.excluded = found
            .into_iter()
            .map(|p| p.into_iter().map(Into::into).collect())
            .collect();
        plan.exclusion_alphabet = alphabet.to_vec();
        plan
    }

    /// Whether the model is used as is.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_none() && self.observes.is_none() && self.excluded.is_empty()
    }

    /// Names of the monitor templates, in the order of `excluded`.
    pub fn monitors(&self) -> Vec<String> {
        (0..self.excluded.len())
            .map(|k| format!("{MONITOR_TEMPLATE}{k}"))
            .collect()
    }

    /// The query for a run that sends all inputs and sees all observations.
    pub fn goal(&self) -> Query {
        let mut goals = vec![];
        if self.inputs.is_some() {
            goals.push(format!("{INPUT_TEMPLATE}.done"));
        }
        if self.observes.is_some() {
            goals.push(format!("{OBSERVER_TEMPLATE}.pass"));
        }
        Query::reach(goals)
    }

    /// The templates to add, as UPPAAL XML.
    pub fn templates(&self) -> Vec<Template> {
        let mut templates = vec![];
        if let Some(inputs) = &self.inputs {
            templates.push(input_template(inputs, &self.clock));
        }
        if let Some(observes) = &self.observes {
            templates.push(observer_template(
                observes,
                self.observe_alphabet.as_deref(),
                &self.clock,
            ));
        }
        for (name, pattern) in self.monitors().into_iter().zip(&self.excluded) {
            templates.push(monitor_template(name, pattern, &self.exclusion_alphabet));
        }
        templates
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// One added template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Template (and process) name
    pub name: String,
    comment: Option<String>,
    // (name, invariant)
    locations: Vec<(String, Option<String>)>,
    // (source, target, guard, sync)
    edges: Vec<(usize, usize, Option<String>, String)>,
}

impl Template {
    fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            comment: None,
            locations: vec![],
            edges: vec![],
        }
    }

    fn location<S: Into<String>>(&mut self, name: S, invariant: Option<String>) -> usize {
        self.locations.push((name.into(), invariant));
        self.locations.len() - 1
    }

    fn edge(&mut self, from: usize, to: usize, guard: Option<String>, sync: String) {
        self.edges.push((from, to, guard, sync));
    }

    fn id(&self, loc: usize) -> String {
        format!("pf_{}_{loc}", self.name)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<template>")?;
        writeln!(f, "  <name>{}</name>", self.name)?;
        if let Some(comment) = &self.comment {
            writeln!(f, "  <declaration>// {}</declaration>", escape(comment))?;
        }
        for (i, (name, invariant)) in self.locations.iter().enumerate() {
            write!(f, "  <location id=\"{}\"><name>{name}</name>", self.id(i))?;
            if let Some(inv) = invariant {
                write!(f, "<label kind=\"invariant\">{}</label>", escape(inv))?;
            }
            writeln!(f, "</location>")?;
        }
        writeln!(f, "  <init ref=\"{}\"/>", self.id(0))?;
        for (from, to, guard, sync) in &self.edges {
            write!(
                f,
                "  <transition><source ref=\"{}\"/><target ref=\"{}\"/>",
                self.id(*from),
                self.id(*to)
            )?;
            if let Some(guard) = guard {
                write!(f, "<label kind=\"guard\">{}</label>", escape(guard))?;
            }
            writeln!(
                f,
                "<label kind=\"synchronisation\">{}</label></transition>",
                escape(sync)
            )?;
        }
        write!(f, "</template>")
    }
}

fn guard(clock: &str, lb: Option<i64>, ub: Option<i64>) -> Option<String> {
    let guards = lb
        .map(|lb| format!("{clock} >= {lb}"))
        .into_iter()
        .chain(ub.map(|ub| format!("{clock} <= {ub}")))
        .collect_vec();
    (!guards.is_empty()).then(|| guards.join(" && "))
}

fn input_template(inputs: &TimedActions, clock: &str) -> Template {
    let mut t = Template::new(INPUT_TEMPLATE);
    let mut at = t.location("start", None);
    for (i, (action, lb, ub)) in inputs.iter().enumerate() {
        t.locations[at].1 = ub.map(|ub| format!("{clock} <= {ub}"));
        let name = if i + 1 == inputs.len() {
            "done".to_string()
        } else {
            format!("sent{i}")
        };
        let next = t.location(name, None);
        t.edge(at, next, guard(clock, lb, ub), format!("{action}!"));
        at = next;
    }
    t
}

fn observer_template(
    observes: &TimedActions,
    alphabet: Option<&[String]>,
    clock: &str,
) -> Template {
    let mut t = Template::new(OBSERVER_TEMPLATE);
    let mut at = t.location("start", None);
    let mut waiting = vec![at];
    for (i, (action, lb, ub)) in observes.iter().enumerate() {
        let name = if i + 1 == observes.len() {
            "pass".to_string()
        } else {
            format!("saw{i}")
        };
        let next = t.location(name, None);
        t.edge(at, next, guard(clock, lb, ub), format!("{action}?"));
        waiting.push(next);
        at = next;
    }
    // the final location accepts anything
    waiting.pop();
    if let Some(alphabet) = alphabet {
        let fail = t.location("fail", None);
        for (i, &at) in waiting.iter().enumerate() {
            let expected = observes.actions()[i].as_str();
            for other in alphabet.iter().filter(|a| a.as_str() != expected) {
                t.edge(at, fail, None, format!("{other}?"));
            }
        }
    }
    t
}

fn monitor_template(name: String, pattern: &[String], alphabet: &[String]) -> Template {
    let mut t = Template::new(name);
    t.comment = Some(format!("pattern: {}", pattern.join(" ")));
    let start = t.location(if pattern.is_empty() { "pass" } else { "start" }, None);
    let mut states = vec![start];
    for (i, action) in pattern.iter().enumerate() {
        let name = if i + 1 == pattern.len() {
            "pass".to_string()
        } else {
            format!("saw{i}")
        };
        let next = t.location(name, None);
        t.edge(states[i], next, None, format!("{action}?"));
        states.push(next);
    }
    let fail = t.location("fail", None);
    for (i, &at) in states.iter().enumerate() {
        let expected = pattern.get(i).map(String::as_str);
        for other in alphabet.iter().filter(|a| Some(a.as_str()) != expected) {
            t.edge(at, fail, None, format!("{other}?"));
        }
    }
    t
}

/// Adds the templates of an [`Instrumentation`] to a model.
pub trait Instrument: fmt::Debug + Send + Sync {
    /// The text of `model` with the templates of `plan` added. The error
    /// says what about the model could not be handled.
    fn instrument(&self, model: &str, plan: &Instrumentation) -> Result<String, String>;
}

/// Instruments UPPAAL `.xml` models by editing their text: the monitor clock
/// is declared globally, templates go right before `<system>`, and their
/// processes are appended to the `system` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlModel;

lazy_static! {
    static ref NTA: Regex = Regex::new(r"<nta(\s[^>]*)?>").unwrap();
    static ref SYSTEM_LINE: Regex = Regex::new(r"(?m)(?:^|<system>)\s*system\s[^;]*(;)").unwrap();
}

fn declares_clock(declarations: &str, clock: &str) -> bool {
    Regex::new(&format!(r"\bclock\b[^;]*\b{}\b", regex::escape(clock)))
        .map(|re| re.is_match(declarations))
        .unwrap_or(false)
}

impl Instrument for XmlModel {
    fn instrument(&self, model: &str, plan: &Instrumentation) -> Result<String, String> {
        let templates = plan.templates();
        if templates.is_empty() {
            return Ok(model.to_string());
        }
        let system_start = model
            .find("<system>")
            .ok_or_else(|| "no <system> element".to_string())?;
        let system_end = model[system_start..]
            .find("</system>")
            .map(|i| system_start + i)
            .ok_or_else(|| "unterminated <system> element".to_string())?;
        let system = &model[system_start..system_end];
        let semicolon = SYSTEM_LINE
            .captures_iter(system)
            .last()
            .and_then(|c| c.get(1))
            .map(|m| system_start + m.start())
            .ok_or_else(|| "no `system` line in <system>".to_string())?;

        let first_template = model
            .find("<template>")
            .map_or(system_start, |i| i.min(system_start));
        let clock_decl = if plan.inputs.is_some() || plan.observes.is_some() {
            let globals = model[..first_template]
                .find("<declaration>")
                .map(|i| i + "<declaration>".len());
            match globals {
                Some(at) if declares_clock(&model[at..first_template], &plan.clock) => None,
                Some(at) => Some((at, format!("\nclock {};\n", plan.clock))),
                None => {
                    let at = NTA
                        .find(model)
                        .map(|m| m.end())
                        .ok_or_else(|| "no <nta> element".to_string())?;
                    Some((at, format!("\n<declaration>clock {};</declaration>", plan.clock)))
                }
            }
        } else {
            None
        };

        let mut added = String::new();
        for t in &templates {
            writeln!(added, "{t}").map_err(|err| err.to_string())?;
        }
        let processes = templates.iter().map(|t| t.name.as_str()).join(", ");

        let mut out = String::with_capacity(model.len() + added.len() + 64);
        let mut copied = 0;
        if let Some((at, decl)) = &clock_decl {
            out.push_str(&model[copied..*at]);
            out.push_str(decl);
            copied = *at;
        }
        out.push_str(&model[copied..system_start]);
        out.push_str(&added);
        out.push_str(&model[system_start..semicolon]);
        out.push_str(&format!(", {processes}"));
        out.push_str(&model[semicolon..]);
        Ok(out)
    }
}

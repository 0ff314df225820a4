// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The form both witness dialects are parsed into, and its normalization
//! into a [`VerificationTrace`].

use actions::{ClockInterval, EdgeStep, Transition, VerificationTrace};

/// Name of the reference (always zero) clock in difference constraints.
pub(crate) const ZERO_CLOCK: &str = "t(0)";

/// A difference constraint `x - y <= bound` (or `<` if `strict`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Constraint {
    pub x: String,
    pub y: String,
    pub bound: i64,
    pub strict: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RawState {
    pub constraints: Vec<Constraint>,
}

impl RawState {
    /// The tightest interval for `clock` implied by the state's constraints.
    /// Strict bounds are closed, since intervals are integral.
    pub fn interval(&self, clock: &str) -> Result<ClockInterval, String> {
        let mut interval = ClockInterval::unbounded();
        for c in &self.constraints {
            if c.x == clock && c.y == ZERO_CLOCK {
                interval.upper = Some(interval.upper.map_or(c.bound, |u| u.min(c.bound)));
            } else if c.x == ZERO_CLOCK && c.y == clock {
                let lower = c
                    .bound
                    .checked_neg()
                    .ok_or_else(|| format!("lower bound {} on {clock} is out of range", c.bound))?;
                interval.lower = interval.lower.max(lower);
            }
        }
        Ok(interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawEdge {
    pub process: String,
    pub from: String,
    pub to: String,
    /// Synchronization label such as `send!`, if any
    pub sync: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawTransition {
    pub edges: Vec<RawEdge>,
    /// Index of the state the transition leads to
    pub target: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RawTrace {
    pub states: Vec<RawState>,
    pub transitions: Vec<RawTransition>,
}

/// The channel of a synchronization label: `send!` and `send?` are both on
/// `send`.
fn channel(sync: &str) -> Option<&str> {
    let ch = sync
        .trim()
        .strip_suffix(['!', '?'])?
        .trim();
    (!ch.is_empty()).then_some(ch)
}

/// The action of a transition: the channel of its sending edge, or failing
/// that of its first synchronizing edge. `None` for internal transitions.
fn action_of(edges: &[RawEdge]) -> Option<String> {
    let syncs = || edges.iter().filter_map(|e| e.sync.as_deref());
    syncs()
        .find(|s| s.trim_end().ends_with('!'))
        .or_else(|| syncs().next())
        .and_then(channel)
        .map(str::to_string)
}

impl RawTrace {
    pub fn normalize(&self, clock: &str) -> Result<VerificationTrace, String> {
        if self.states.is_empty() {
            return Err("trace has no states".to_string());
        }
        let mut transitions = vec![];
        for t in &self.transitions {
            let state = self.states.get(t.target).ok_or_else(|| {
                format!("transition leads to missing state {}", t.target)
            })?;
            let Some(action) = action_of(&t.edges) else {
                continue;
            };
            transitions.push(Transition {
                action,
                edges: t
                    .edges
                    .iter()
                    .map(|e| EdgeStep {
                        process: e.process.clone(),
                        from: e.from.clone(),
                        to: e.to.clone(),
                    })
                    .collect(),
                interval: state.interval(clock)?,
            });
        }
        VerificationTrace::new(clock, transitions).map_err(|err| err.to_string())
    }
}

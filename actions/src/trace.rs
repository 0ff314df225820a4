// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Normalized verifier witnesses: an ordered list of transitions, each with
//! the interval of the reference clock in which it can be taken.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::sequence::{TimedActions, UNCONSTRAINED};

/// Feasible values of the reference clock, `lower <= clock <= upper`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClockInterval {
    /// Inclusive lower bound (clocks are never negative, so at least 0)
    pub lower: i64,
    /// Inclusive upper bound, `None` if the clock is unbounded from above
    pub upper: Option<i64>,
}

impl ClockInterval {
    /// The interval with no constraint except non-negativity.
    pub fn unbounded() -> Self {
        Self {
            lower: 0,
            upper: None,
        }
    }
}

impl fmt::Display for ClockInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upper {
            Some(upper) => write!(f, "[{},{upper}]", self.lower),
            None => write!(f, "[{},inf)", self.lower),
        }
    }
}

/// A process moving along one edge as part of a transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EdgeStep {
    /// Process (template instance) name
    pub process: String,
    /// Source location
    pub from: String,
    /// Target location
    pub to: String,
}

/// A single observable step of a witness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Transition {
    /// Channel the step synchronized on
    pub action: String,
    /// Edges taken by the participating processes
    pub edges: Vec<EdgeStep>,
    /// Interval of the reference clock when the step happens
    pub interval: ClockInterval,
}

/// A witness whose reference clock goes backwards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("clock lower bound drops from {previous} to {lower} at transition {index} ({action})")]
pub struct TraceOrderError {
    /// Position of the offending transition
    pub index: usize,
    /// Its action
    pub action: String,
    /// Lower bound of the transition before it
    pub previous: i64,
    /// Its own lower bound
    pub lower: i64,
}

/// The timed trace read back from one verifier witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationTrace {
    clock: String,
    transitions: Vec<Transition>,
}

impl VerificationTrace {
    /// Build a trace over `clock`. The reference clock is never reset, so the
    /// lower bounds of successive transitions must not decrease.
    pub fn new<S: Into<String>>(
        clock: S,
        transitions: Vec<Transition>,
    ) -> Result<Self, TraceOrderError> {
        for (index, pair) in transitions.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.interval.lower < prev.interval.lower {
                return Err(TraceOrderError {
                    index: index + 1,
                    action: next.action.clone(),
                    previous: prev.interval.lower,
                    lower: next.interval.lower,
                });
            }
        }
        Ok(Self {
            clock: clock.into(),
            transitions,
        })
    }

    /// Name of the reference clock the intervals refer to.
    pub fn clock(&self) -> &str {
        &self.clock
    }

    /// The transitions in witness order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Whether the witness has no observable transition.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Action labels in order.
    pub fn actions(&self) -> Vec<&str> {
        self.transitions.iter().map(|t| t.action.as_str()).collect()
    }

    /// Restrict the trace to the transitions whose action is in `focused`.
    /// `None` keeps every transition.
    pub fn focus(&self, focused: Option<&[String]>) -> Self {
        let transitions = match focused {
            None => self.transitions.clone(),
            Some(focused) => self
                .transitions
                .iter()
                .filter(|t| focused.contains(&t.action))
                .cloned()
                .collect(),
        };
        // a subsequence of a monotonic trace is still monotonic
        Self {
            clock: self.clock.clone(),
            transitions,
        }
    }

    /// Convert into a constrained [`TimedActions`], one action per
    /// transition, with an unbounded upper end mapped to [`UNCONSTRAINED`].
    pub fn to_timed_actions(&self) -> TimedActions {
        let actions = self.transitions.iter().map(|t| t.action.clone());
        let lb = self.transitions.iter().map(|t| t.interval.lower).collect();
        let ub = self
            .transitions
            .iter()
            .map(|t| t.interval.upper.unwrap_or(UNCONSTRAINED))
            .collect();
        TimedActions::new(actions, Some(lb), Some(ub))
            .expect("one bound per transition by construction")
    }
}

impl fmt::Display for VerificationTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.transitions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{i}: {} {}{}", t.action, self.clock, t.interval)?;
        }
        Ok(())
    }
}

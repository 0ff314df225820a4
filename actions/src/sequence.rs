// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! A sequence of action labels, each with an optional clock interval.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bound value meaning "no constraint on the reference clock".
pub const UNCONSTRAINED: i64 = -1;

/// Name of the reference clock used when the caller does not pick one.
pub const DEFAULT_CLOCK: &str = "monitor_clk";

/// Bound vectors given to [`TimedActions::new`] that do not line up with the
/// actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{which} bounds have {found} entries but there are {expected} actions")]
pub struct ShapeMismatchError {
    /// Which bound vector was wrong (`"lower"` or `"upper"`).
    pub which: &'static str,
    /// Number of actions.
    pub expected: usize,
    /// Length of the offending bound vector.
    pub found: usize,
}

/// An ordered list of actions, each guarded by a lower and upper bound on a
/// reference clock. A bound equal to [`UNCONSTRAINED`] imposes nothing.
///
/// The same value answers both as a bare pattern ([`TimedActions::to_pattern`])
/// and as a list of guarded actions ([`TimedActions::to_constrained_trace`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimedActions")]
pub struct TimedActions {
    actions: Vec<String>,
    lb: Vec<i64>,
    ub: Vec<i64>,
}

// deserialization goes through `TimedActions::new` so the shape is checked
#[derive(Deserialize)]
struct RawTimedActions {
    actions: Vec<String>,
    lb: Vec<i64>,
    ub: Vec<i64>,
}

impl TryFrom<RawTimedActions> for TimedActions {
    type Error = ShapeMismatchError;

    fn try_from(raw: RawTimedActions) -> Result<Self, Self::Error> {
        Self::new(raw.actions, Some(raw.lb), Some(raw.ub))
    }
}

/// One entry of the constrained-trace view: an action and the two clock
/// guards it must satisfy, e.g. `("send", "c>=0", "c<=5")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardedAction {
    /// Action label
    pub action: String,
    /// Lower guard, `<clock>>=<lb>`
    pub lower: String,
    /// Upper guard, `<clock><=<ub>`
    pub upper: String,
}

impl GuardedAction {
    /// Borrow the entry as a plain triple.
    pub fn as_tuple(&self) -> (&str, &str, &str) {
        (&self.action, &self.lower, &self.upper)
    }
}

fn check_shape(
    which: &'static str,
    bounds: Option<Vec<i64>>,
    expected: usize,
) -> Result<Vec<i64>, ShapeMismatchError> {
    match bounds {
        None => Ok(vec![UNCONSTRAINED; expected]),
        Some(bounds) if bounds.len() == expected => Ok(bounds),
        Some(bounds) => Err(ShapeMismatchError {
            which,
            expected,
            found: bounds.len(),
        }),
    }
}

impl TimedActions {
    /// Build a sequence from action labels and optional bounds. Missing bound
    /// vectors default to [`UNCONSTRAINED`] everywhere; a bound vector of the
    /// wrong length is an error.
    pub fn new<I, S>(
        actions: I,
        lb: Option<Vec<i64>>,
        ub: Option<Vec<i64>>,
    ) -> Result<Self, ShapeMismatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let actions: Vec<String> = actions.into_iter().map(Into::into).collect();
        let lb = check_shape("lower", lb, actions.len())?;
        let ub = check_shape("upper", ub, actions.len())?;
        Ok(Self { actions, lb, ub })
    }

    /// Build a sequence with no timing constraints at all.
    pub fn pattern<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let actions: Vec<String> = actions.into_iter().map(Into::into).collect();
        let n = actions.len();
        Self {
            actions,
            lb: vec![UNCONSTRAINED; n],
            ub: vec![UNCONSTRAINED; n],
        }
    }

    /// The action labels.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Lower bounds, one per action.
    pub fn lower_bounds(&self) -> &[i64] {
        &self.lb
    }

    /// Upper bounds, one per action.
    pub fn upper_bounds(&self) -> &[i64] {
        &self.ub
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether there are no actions.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True if no action carries a timing constraint.
    pub fn is_pattern_only(&self) -> bool {
        self.lb.iter().chain(&self.ub).all(|&b| b == UNCONSTRAINED)
    }

    /// The bare label sequence.
    pub fn to_pattern(&self) -> Vec<&str> {
        self.actions.iter().map(String::as_str).collect()
    }

    /// Each action with its guards written against `clock`. Bounds are
    /// written as-is, including the [`UNCONSTRAINED`] sentinel.
    pub fn to_constrained_trace(&self, clock: &str) -> Vec<GuardedAction> {
        self.actions
            .iter()
            .zip(self.lb.iter().zip(&self.ub))
            .map(|(action, (lb, ub))| GuardedAction {
                action: action.clone(),
                lower: format!("{clock}>={lb}"),
                upper: format!("{clock}<={ub}"),
            })
            .collect()
    }

    /// Iterate over `(action, lower, upper)` with unconstrained bounds mapped
    /// to `None`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<i64>, Option<i64>)> {
        let bound = |b: i64| (b != UNCONSTRAINED).then_some(b);
        self.actions
            .iter()
            .zip(self.lb.iter().zip(&self.ub))
            .map(move |(a, (&lb, &ub))| (a.as_str(), bound(lb), bound(ub)))
    }
}

impl fmt::Display for TimedActions {
    /// Written as `send[0,5] ack[2,10] done`: actions without constraints
    /// have no brackets, and a missing side of an interval is left empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.iter().map(|(action, lb, ub)| match (lb, ub) {
            (None, None) => action.to_string(),
            _ => format!(
                "{action}[{},{}]",
                lb.map(|b| b.to_string()).unwrap_or_default(),
                ub.map(|b| b.to_string()).unwrap_or_default()
            ),
        });
        write!(f, "{}", items.format(" "))
    }
}

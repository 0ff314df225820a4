// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Reachability queries asking `verifyta` for a pattern.
//!
//! Queries only name locations of the templates added by
//! [`crate::monitor`], e.g. `E<> PatternObserver.pass`, and patterns already
//! found are ruled out with `&& !PatternMonitor0.pass` conjuncts.

use std::fmt;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    // operators binding looser than `&&`
    static ref LOOSE_OPERATOR: Regex = Regex::new(r"\|\||\bor\b|\bimply\b").unwrap();
}

/// The text of a query file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    /// A query given verbatim.
    pub fn raw<S: Into<String>>(text: S) -> Self {
        Self(text.into().trim().to_string())
    }

    /// `E<>` of the conjunction of `goals`, or `E<> true` without any.
    pub fn reach<I, S>(goals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let goals = goals.into_iter().map(|g| g.as_ref().to_string()).join(" && ");
        if goals.is_empty() {
            Self("E<> true".to_string())
        } else {
            Self(format!("E<> {goals}"))
        }
    }

    /// The formula of an `E<>` query.
    fn reachable(&self) -> Option<&str> {
        self.0.strip_prefix("E<>").map(str::trim)
    }

    /// Whether this is an `E<>` query.
    pub fn is_reachability(&self) -> bool {
        self.reachable().is_some()
    }

    /// This query with none of the `monitors` in its `pass` location.
    /// `None` if the query is not an `E<>` query.
    pub fn excluding<I, S>(&self, monitors: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut monitors = monitors.into_iter().peekable();
        if monitors.peek().is_none() {
            return Some(self.clone());
        }
        let formula = self.reachable()?;
        let mut text = if LOOSE_OPERATOR.is_match(formula) {
            format!("E<> ({formula})")
        } else {
            format!("E<> {formula}")
        };
        for monitor in monitors {
            text.push_str(&format!(" && !{}.pass", monitor.as_ref()));
        }
        Some(Self(text))
    }

    /// The query text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

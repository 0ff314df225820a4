// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Parser for the readable textual trace printed by UPPAAL's `tracer` (and
//! by `verifyta -y`).
//!
//! The text alternates `State:` and `Transitions:` blocks. A state lists the
//! locations, then clock constraints in difference form (`x-y<=k`), then
//! variable values; a transition block lists one edge per line, written
//! `P.from->P.to { guard, sync, update }`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::raw::{Constraint, RawEdge, RawState, RawTrace, RawTransition};

lazy_static! {
    static ref DIFFERENCE_RE: Regex =
        Regex::new(r"^([\w.\[\]()]+)-([\w.\[\]()]+)(<=|<)(-?[0-9]+)$").unwrap();
    static ref EDGE_RE: Regex =
        Regex::new(r"^([\w\[\]()]+)\.([\w\[\]]+)->([\w\[\]()]+)\.([\w\[\]]+)\s*\{(.*)\}$").unwrap();
    static ref SYNC_RE: Regex = Regex::new(r"^[A-Za-z_][\w\[\]]*[!?]$").unwrap();
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Section {
    Preamble,
    State,
    Transitions,
}

fn parse_edge(line: &str) -> Option<Result<RawEdge, String>> {
    let cs = EDGE_RE.captures(line)?;
    let (process, target_process) = (&cs[1], &cs[3]);
    if process != target_process {
        return Some(Err(format!(
            "edge {line:?} moves between processes {process} and {target_process}"
        )));
    }
    let sync = cs[5]
        .split(',')
        .map(str::trim)
        .find(|part| SYNC_RE.is_match(part))
        .map(str::to_string);
    Some(Ok(RawEdge {
        process: process.to_string(),
        from: cs[2].to_string(),
        to: cs[4].to_string(),
        sync,
    }))
}

fn parse_constraints(line: &str) -> Result<Vec<Constraint>, String> {
    let mut constraints = vec![];
    for token in line.split_whitespace() {
        if let Some(cs) = DIFFERENCE_RE.captures(token) {
            let bound = cs[4]
                .parse::<i64>()
                .map_err(|err| format!("bad bound in {token:?}: {err}"))?;
            constraints.push(Constraint {
                x: cs[1].to_string(),
                y: cs[2].to_string(),
                bound,
                strict: &cs[3] == "<",
            });
        }
    }
    Ok(constraints)
}

pub(crate) fn parse(text: &str) -> Result<RawTrace, String> {
    let mut trace = RawTrace::default();
    let mut pending: Option<Vec<RawEdge>> = None;
    let mut section = Section::Preamble;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        let lineno = lineno + 1;
        match line {
            "" => continue,
            "State:" => {
                trace.states.push(RawState::default());
                if let Some(edges) = pending.take() {
                    trace.transitions.push(RawTransition {
                        edges,
                        target: trace.states.len() - 1,
                    });
                }
                section = Section::State;
                continue;
            }
            "Transitions:" | "Transition:" => {
                if trace.states.is_empty() {
                    return Err(format!("line {lineno}: transitions before any state"));
                }
                if pending.is_some() {
                    return Err(format!(
                        "line {lineno}: two transition blocks without a state between them"
                    ));
                }
                pending = Some(vec![]);
                section = Section::Transitions;
                continue;
            }
            _ => {}
        }
        match section {
            // banners and property results before the first state
            Section::Preamble => {}
            Section::State => {
                // the location vector is `( P.idle Q.idle )`
                if line.starts_with('(') {
                    continue;
                }
                let constraints = parse_constraints(line).map_err(|e| format!("line {lineno}: {e}"))?;
                if let Some(state) = trace.states.last_mut() {
                    state.constraints.extend(constraints);
                }
            }
            Section::Transitions => {
                if line.starts_with("Delay") {
                    continue;
                }
                match parse_edge(line) {
                    Some(edge) => {
                        let edge = edge.map_err(|e| format!("line {lineno}: {e}"))?;
                        if let Some(edges) = pending.as_mut() {
                            edges.push(edge);
                        }
                    }
                    None => return Err(format!("line {lineno}: unrecognized edge {line:?}")),
                }
            }
        }
    }
    if pending.is_some() {
        return Err("trace ends with a transition and no target state".to_string());
    }
    if trace.states.is_empty() {
        return Err("no `State:` block found".to_string());
    }
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_edge() {
        let edge = parse_edge("P.idle->P.sent { x >= 2, send!, x := 0 }")
            .unwrap()
            .unwrap();
        assert_eq!(edge.process, "P");
        assert_eq!(edge.from, "idle");
        assert_eq!(edge.to, "sent");
        assert_eq!(edge.sync.as_deref(), Some("send!"));
        let edge = parse_edge("Q(1).a->Q(1).b { f(1, 2), tau, 1 }")
            .unwrap()
            .unwrap();
        assert_eq!(edge.process, "Q(1)");
        assert_eq!(edge.sync, None);
        assert!(parse_edge("P.a->Q.b { 1, go!, 1 }").unwrap().is_err());
        assert!(parse_edge("Delay: 3").is_none());
    }

    #[test]
    fn test_parse_constraints() {
        let cs = parse_constraints("t(0)-c<=-3 c-t(0)<10 x=4 c-x<=0").unwrap();
        assert_eq!(cs.len(), 3);
        assert_eq!(
            cs[1],
            Constraint {
                x: "c".to_string(),
                y: "t(0)".to_string(),
                bound: 10,
                strict: true
            }
        );
    }

    #[test]
    fn test_parse_trace() {
        let text = "
Showing symbolic trace.

State:
( P.idle )
t(0)-c<=0 c-t(0)<=0

Transitions:
  P.idle->P.busy { 1, go!, 1 }

State:
( P.busy )
t(0)-c<=-1 c-t(0)<=4
";
        let raw = parse(text).unwrap();
        assert_eq!(raw.states.len(), 2);
        assert_eq!(raw.transitions.len(), 1);
        assert_eq!(raw.transitions[0].target, 1);
        let trace = raw.normalize("c").unwrap();
        insta::assert_display_snapshot!(trace, @"0: go c[1,4]");
    }

    #[test]
    fn test_malformed() {
        assert!(parse("").is_err());
        assert!(parse("Formula is satisfied.\n").is_err());
        assert!(parse("Transitions:\n  P.a->P.b { 1, go!, 1 }\n").is_err());
        assert!(parse("State:\n( P.a )\nTransitions:\n  P.a->P.b { 1, go!, 1 }\n").is_err());
        assert!(parse("State:\n( P.a )\nTransitions:\n  garbage\nState:\n").is_err());
    }
}

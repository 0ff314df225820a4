// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Parser for verbose `.xml` witnesses.
//!
//! The document is first read into a plain element tree (attributes and
//! children only; text content is not used), which is then interpreted.
//! A `<trace>` lists its symbols once and refers to them by id:
//!
//! - `<clock id name>`, `<process id name>`, `<location id process name>`
//!   and `<edge id from to sync>` (with `from`/`to` naming locations),
//! - `<dbm_instance id>` with `<clockbound clock1 clock2 bound comp>`
//!   children, each meaning `clock1 - clock2 comp bound`,
//! - `<node id dbm_instance ...>` for every state, in trace order, and
//! - `<transition from to edges>` with a space-separated list of edge ids.
//!
//! Location and variable vectors are not needed for timed traces and are
//! skipped.

use std::collections::HashMap;

use crate::raw::{Constraint, RawEdge, RawState, RawTrace, RawTransition, ZERO_CLOCK};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, name: &str) -> Result<&str, String> {
        self.attr(name)
            .ok_or_else(|| format!("<{}> is missing attribute `{name}`", self.name))
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

peg::parser! {
grammar parser() for str {
    rule whitespace() = [' ' | '\t' | '\r' | '\n']
    rule comment() = "<!--" (!"-->" [_])* "-->"
    rule _ = (whitespace() / comment())*

    rule declaration() = "<?" (!"?>" [_])* "?>"
    rule doctype() = "<!DOCTYPE" [^ '>']* ">"

    rule name() -> String
    = s:$(['a'..='z' | 'A'..='Z' | '_' | ':'] ['a'..='z' | 'A'..='Z' | '0'..='9' | '_' | ':' | '-' | '.']*)
    { s.to_string() }

    rule quoted() -> String
    = "\"" v:$([^ '"']*) "\"" { unescape(v) }
    / "'" v:$([^ '\'']*) "'" { unescape(v) }

    rule attribute() -> (String, String)
    = whitespace()+ n:name() whitespace()* "=" whitespace()* v:quoted() { (n, v) }

    rule node() -> Option<Element>
    = e:element() { Some(e) }
    / comment() { None }
    / [^ '<']+ { None }

    rule element() -> Element
    = "<" name:name() attrs:attribute()* whitespace()* "/>"
    { Element { name, attrs, children: vec![] } }
    / "<" name:name() attrs:attribute()* whitespace()* ">" children:node()* "</" end:name() whitespace()* ">"
    {?
        if end == name {
            Ok(Element { name, attrs, children: children.into_iter().flatten().collect() })
        } else {
            Err("matching closing tag")
        }
    }

    pub rule document() -> Element
    = _ (declaration() _)? (doctype() _)? e:element() _ { e }
}
}

fn parse_bound(s: &str) -> Result<Option<i64>, String> {
    match s.trim() {
        "inf" | "INF" | "infinity" => Ok(None),
        s => s
            .parse::<i64>()
            .map(Some)
            .map_err(|err| format!("bad bound {s:?}: {err}")),
    }
}

/// The ids of a space-separated reference list such as `edges="e1 e2"`.
fn id_list(s: &str) -> impl Iterator<Item = &str> {
    s.split_whitespace()
}

/// Clock names as used in constraints; the zero clock is `t(0)` whichever
/// way the witness qualifies it.
fn clock_name(name: &str) -> String {
    if name == ZERO_CLOCK || name.ends_with(&format!(".{ZERO_CLOCK}")) {
        ZERO_CLOCK.to_string()
    } else {
        name.to_string()
    }
}

/// Definitions a `<trace>` refers to by id.
#[derive(Debug, Default)]
struct Symbols<'a> {
    clocks: HashMap<&'a str, String>,
    processes: HashMap<&'a str, &'a str>,
    locations: HashMap<&'a str, &'a Element>,
    edges: HashMap<&'a str, &'a Element>,
    dbms: HashMap<&'a str, &'a Element>,
}

fn define<'a>(
    table: &mut HashMap<&'a str, &'a Element>,
    el: &'a Element,
) -> Result<(), String> {
    let id = el.required("id")?;
    if table.insert(id, el).is_some() {
        return Err(format!("duplicate <{}> id {id:?}", el.name));
    }
    Ok(())
}

impl<'a> Symbols<'a> {
    fn collect(trace: &'a Element) -> Result<Self, String> {
        let mut symbols = Symbols::default();
        for el in &trace.children {
            match el.name.as_str() {
                "clock" => {
                    let name = clock_name(el.required("name")?);
                    symbols.clocks.insert(el.required("id")?, name);
                }
                "process" => {
                    symbols
                        .processes
                        .insert(el.required("id")?, el.required("name")?);
                }
                "location" => define(&mut symbols.locations, el)?,
                "edge" => define(&mut symbols.edges, el)?,
                "dbm_instance" => define(&mut symbols.dbms, el)?,
                _ => {}
            }
        }
        Ok(symbols)
    }

    fn clock(&self, id: &str) -> Result<String, String> {
        self.clocks
            .get(id)
            .cloned()
            .ok_or_else(|| format!("reference to unknown clock {id:?}"))
    }

    fn process(&self, id: &'a str) -> &'a str {
        self.processes.get(id).copied().unwrap_or(id)
    }

    fn location(&self, id: &'a str) -> Result<&'a Element, String> {
        self.locations
            .get(id)
            .copied()
            .ok_or_else(|| format!("reference to unknown location {id:?}"))
    }

    /// The name of a location and the process it belongs to.
    fn location_name(&self, id: &'a str) -> Result<(&'a str, Option<&'a str>), String> {
        let el = self.location(id)?;
        Ok((
            el.attr("name").unwrap_or(id),
            el.attr("process").map(|p| self.process(p)),
        ))
    }

    fn state(&self, node: &Element) -> Result<RawState, String> {
        let Some(dbm) = node.attr("dbm_instance") else {
            return Ok(RawState::default());
        };
        let dbm = self
            .dbms
            .get(dbm)
            .ok_or_else(|| format!("reference to unknown dbm_instance {dbm:?}"))?;
        let mut constraints = vec![];
        for c in dbm.children_named("clockbound") {
            let Some(bound) = parse_bound(c.required("bound")?)? else {
                continue;
            };
            let strict = match c.attr("comp").map(str::trim) {
                None | Some("<=") => false,
                Some("<") => true,
                Some(comp) => return Err(format!("unknown comparison {comp:?}")),
            };
            constraints.push(Constraint {
                x: self.clock(c.required("clock1")?)?,
                y: self.clock(c.required("clock2")?)?,
                bound,
                strict,
            });
        }
        Ok(RawState { constraints })
    }

    fn edge(&self, id: &'a str) -> Result<RawEdge, String> {
        let el = self
            .edges
            .get(id)
            .ok_or_else(|| format!("reference to unknown edge {id:?}"))?;
        let (from, from_process) = self.location_name(el.required("from")?)?;
        let (to, _) = self.location_name(el.required("to")?)?;
        let process = match el.attr("process") {
            Some(p) => self.process(p),
            None => from_process.unwrap_or_else(|| id.split('.').next().unwrap_or(id)),
        };
        Ok(RawEdge {
            process: process.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            sync: el
                .attr("sync")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

pub(crate) fn parse(text: &str) -> Result<RawTrace, String> {
    let root = parser::document(text).map_err(|err| format!("not an XML document: {err}"))?;
    let trace_el = if root.name == "trace" {
        &root
    } else {
        root.children_named("trace")
            .next()
            .ok_or_else(|| format!("expected a <trace> element, found <{}>", root.name))?
    };
    let symbols = Symbols::collect(trace_el)?;

    let mut trace = RawTrace::default();
    let mut ids = HashMap::new();
    for el in trace_el.children_named("node") {
        let id = el.required("id")?;
        if ids.insert(id, trace.states.len()).is_some() {
            return Err(format!("duplicate node id {id:?}"));
        }
        trace.states.push(symbols.state(el)?);
    }
    for el in trace_el.children_named("transition") {
        let to = el.required("to")?;
        let target = *ids
            .get(to)
            .ok_or_else(|| format!("transition to unknown node {to:?}"))?;
        let edges = id_list(el.attr("edges").unwrap_or_default())
            .map(|id| symbols.edge(id))
            .collect::<Result<Vec<_>, String>>()?;
        trace.transitions.push(RawTransition { edges, target });
    }
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_tree() {
        let root = parser::document(
            r#"<?xml version="1.0"?>
            <!-- comment -->
            <a x='1' y = "&lt;2&gt;">text<b/><!-- c --><c z="3">more</c></a>"#,
        )
        .unwrap();
        assert_eq!(root.name, "a");
        assert_eq!(root.attr("y"), Some("<2>"));
        let names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(parser::document("<a><b></a>").is_err());
        assert!(parser::document("<a>").is_err());
    }

    const GO: &str = r#"
        <clock id="c0" name="t(0)"/>
        <clock id="c1" name="c"/>
        <process id="p0" name="P"/>
        <location id="p0.l0" process="p0" name="idle"/>
        <location id="p0.l1" process="p0" name="busy"/>
        <edge id="p0.e0" from="p0.l0" to="p0.l1" guard="1" sync="go!" update="1"/>
        <dbm_instance id="d0">
          <clockbound clock1="c0" clock2="c1" bound="0" comp="&lt;="/>
        </dbm_instance>
        <dbm_instance id="d1">
          <clockbound clock1="c0" clock2="c1" bound="-1" comp="&lt;="/>
          <clockbound clock1="c1" clock2="c0" bound="4" comp="&lt;"/>
        </dbm_instance>"#;

    fn trace(body: &str) -> String {
        format!("<trace>{GO}{body}</trace>")
    }

    #[test]
    fn test_parse_trace() {
        let raw = parse(&trace(
            r#"<node id="s0" location_vector="lv0" dbm_instance="d0" variable_vector="vv0"/>
               <node id="s1" location_vector="lv1" dbm_instance="d1" variable_vector="vv0"/>
               <transition from="s0" to="s1" edges="p0.e0"/>"#,
        ))
        .unwrap();
        assert_eq!(raw.transitions[0].target, 1);
        assert_eq!(raw.transitions[0].edges[0].process, "P");
        assert_eq!(raw.transitions[0].edges[0].from, "idle");
        assert!(raw.states[1].constraints[1].strict);
        let trace = raw.normalize("c").unwrap();
        insta::assert_display_snapshot!(trace, @"0: go c[1,4]");
    }

    #[test]
    fn test_qualified_clocks() {
        let raw = parse(
            r#"<trace>
              <clock id="a" name="sys.t(0)"/>
              <clock id="b" name="c"/>
              <dbm_instance id="d">
                <clockbound clock1="b" clock2="a" bound="inf" comp="&lt;"/>
                <clockbound clock1="a" clock2="b" bound="-3" comp="&lt;="/>
              </dbm_instance>
              <node id="n" dbm_instance="d"/>
            </trace>"#,
        )
        .unwrap();
        assert_eq!(raw.states[0].constraints.len(), 1);
        assert_eq!(raw.states[0].constraints[0].x, ZERO_CLOCK);
        assert_eq!(raw.states[0].interval("c").unwrap().lower, 3);
    }

    #[test]
    fn test_wrapped_trace() {
        let raw = parse(r#"<result><trace><node id="s"/></trace></result>"#).unwrap();
        assert_eq!(raw.states.len(), 1);
    }

    #[test]
    fn test_malformed() {
        assert!(parse("Formula is satisfied").is_err());
        assert!(parse("<nta/>").is_err());
        assert!(parse(r#"<trace><node/></trace>"#).is_err());
        assert!(parse(r#"<trace><node id="a"/><node id="a"/></trace>"#).is_err());
        // unknown node, edge, dbm and clock references
        assert!(parse(&trace(r#"<node id="s0"/><transition from="s0" to="s1" edges="p0.e0"/>"#)).is_err());
        assert!(parse(&trace(
            r#"<node id="s0"/><node id="s1"/><transition from="s0" to="s1" edges="p0.e9"/>"#
        ))
        .is_err());
        assert!(parse(&trace(r#"<node id="s0" dbm_instance="d7"/>"#)).is_err());
        assert!(parse(
            r#"<trace><dbm_instance id="d"><clockbound clock1="x" clock2="y" bound="1"/></dbm_instance><node id="n" dbm_instance="d"/></trace>"#
        )
        .is_err());
        assert!(parse(
            r#"<trace><clock id="c" name="c"/><dbm_instance id="d"><clockbound clock1="c" clock2="c" bound="five"/></dbm_instance><node id="n" dbm_instance="d"/></trace>"#
        )
        .is_err());
    }
}

// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Extract traces through shell stand-ins for `verifyta` and `tracer`.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use eyre::Result;
use tracer::{get_timed_trace, Extractor, TraceError};
use verifyta::{VerifierConf, VerifierError};

const FAKE_VERIFYTA: &str = r#"#!/bin/sh
if [ "$1" = "-h" ]; then
  echo "  -h [ --help ]   Print this help message."
  exit 0
fi
if [ "$UPPAAL_COMPILE_ONLY" = "1" ]; then
  if grep -q broken "$1"; then
    echo "$1:3: syntax error, unexpected T_ID" >&2
    exit 1
  fi
  echo "compiled $1"
  exit 0
fi
exit 2
"#;

// renders a "compact" witness by printing it, after checking the compiled
// model came from the stand-in verifyta
const FAKE_TRACER: &str = r#"#!/bin/sh
grep -q '^compiled ' "$1" || { echo "bad intermediate file $1" >&2; exit 1; }
cat "$2"
"#;

fn install(dir: &Path, name: &str, script: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, script)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

struct Setup {
    _tools: tempfile::TempDir,
    work: tempfile::TempDir,
    conf: VerifierConf,
    model: PathBuf,
}

fn setup() -> Result<Setup> {
    let tools = tempfile::tempdir()?;
    install(tools.path(), "tracer", FAKE_TRACER)?;
    let conf = VerifierConf::new(install(tools.path(), "verifyta", FAKE_VERIFYTA)?)?;
    let work = tempfile::tempdir()?;
    let model = work.path().join("model.xml");
    fs::write(&model, "<nta/>")?;
    Ok(Setup {
        _tools: tools,
        work,
        conf,
        model,
    })
}

fn compact_trace(dir: &Path) -> Result<PathBuf> {
    let trace = dir.join("trace.xtr");
    fs::copy("tests/fixtures/send_ack.txt", &trace)?;
    Ok(trace)
}

fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = vec![];
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}

#[test]
fn test_compact_without_hold() -> Result<()> {
    let s = setup()?;
    let out = s.work.path().join("out");
    fs::create_dir(&out)?;
    let trace = compact_trace(&out)?;
    let timed = get_timed_trace(&s.conf, &s.model, &trace, false)?;
    assert_eq!(timed.actions(), vec!["send", "ack", "done"]);
    assert_eq!(file_names(&out)?, vec!["trace.xtr"]);
    Ok(())
}

#[test]
fn test_compact_with_hold() -> Result<()> {
    let s = setup()?;
    let trace = compact_trace(s.work.path())?;
    let timed = get_timed_trace(&s.conf, &s.model, &trace, true)?;
    assert_eq!(timed.len(), 3);
    let names = file_names(s.work.path())?;
    let prefix = format!("trace-{}-", std::process::id());
    let held: Vec<&String> = names.iter().filter(|n| n.starts_with(&prefix)).collect();
    assert_eq!(held.len(), 2, "{names:?}");
    assert!(held.iter().any(|n| n.ends_with(".if")));
    let rendered = held.iter().find(|n| n.ends_with(".txt")).unwrap();
    assert_eq!(
        fs::read_to_string(s.work.path().join(rendered))?,
        fs::read_to_string("tests/fixtures/send_ack.txt")?
    );
    Ok(())
}

#[test]
fn test_compile_failure() -> Result<()> {
    let s = setup()?;
    fs::write(&s.model, "<nta>broken</nta>")?;
    let trace = compact_trace(s.work.path())?;
    let err = get_timed_trace(&s.conf, &s.model, &trace, false).unwrap_err();
    match err {
        TraceError::Verifier(VerifierError::VerifierFailure {
            status, message, ..
        }) => {
            assert_eq!(status, Some(1));
            assert!(message.contains("syntax error"), "{message}");
        }
        err => panic!("unexpected error {err}"),
    }
    Ok(())
}

#[test]
fn test_xml_is_read_directly() -> Result<()> {
    let s = setup()?;
    let trace = s.work.path().join("trace.xml");
    fs::copy("tests/fixtures/send_ack.xml", &trace)?;
    // no compilation happens, so a broken model does not matter
    fs::write(&s.model, "broken")?;
    let timed = Extractor::new(&s.conf)
        .clock("monitor_clk")
        .extract(&s.model, &trace)?;
    assert_eq!(timed.to_timed_actions().upper_bounds(), &[5, 10, -1]);
    Ok(())
}

#[test]
fn test_malformed_witness() -> Result<()> {
    let s = setup()?;
    let trace = s.work.path().join("trace.xml");
    fs::write(&trace, "Formula is satisfied.")?;
    let err = get_timed_trace(&s.conf, &s.model, &trace, false).unwrap_err();
    assert!(
        matches!(&err, TraceError::Malformed { path, .. } if path == &trace),
        "{err}"
    );

    let unknown = s.work.path().join("trace.log");
    fs::write(&unknown, "")?;
    let err = get_timed_trace(&s.conf, &s.model, &unknown, false).unwrap_err();
    assert!(matches!(err, TraceError::Malformed { .. }));
    Ok(())
}

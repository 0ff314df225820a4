// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Parse every witness under `tests/fixtures` in both dialects and check
//! they agree.

use std::{fs, path::Path};

use actions::{TimedActions, VerificationTrace, DEFAULT_CLOCK};
use eyre::{eyre, Result};
use tracer::parse_witness;
use verifyta::TraceFormat;
use walkdir::WalkDir;

fn parse_fixture(path: &Path) -> Result<Option<VerificationTrace>> {
    let format = match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => TraceFormat::Xml,
        // `tracer` output for a compact witness
        Some("txt") => TraceFormat::Xtr,
        _ => return Ok(None),
    };
    let text = fs::read_to_string(path)?;
    let trace = parse_witness(&text, format, DEFAULT_CLOCK)
        .map_err(|err| eyre!("{}: {err}", path.display()))?;
    Ok(Some(trace))
}

#[test]
fn test_all_fixtures() -> Result<()> {
    let mut parsed = vec![];
    for entry in WalkDir::new("tests/fixtures").sort_by_file_name() {
        let entry = entry?;
        if let Some(trace) = parse_fixture(entry.path())? {
            parsed.push((entry.path().to_path_buf(), trace));
        }
    }
    assert!(parsed.len() >= 2, "fixtures not found");
    for (path, trace) in &parsed {
        let stem = path.file_stem().unwrap();
        for (other_path, other) in &parsed {
            if other_path.file_stem().unwrap() == stem {
                assert_eq!(trace, other, "{} and {} differ", path.display(), other_path.display());
            }
        }
    }
    Ok(())
}

#[test]
fn test_send_ack() -> Result<()> {
    let trace = parse_fixture(Path::new("tests/fixtures/send_ack.xml"))?.unwrap();
    insta::assert_display_snapshot!(trace, @r###"
    0: send monitor_clk[0,5]
    1: ack monitor_clk[2,10]
    2: done monitor_clk[7,inf)
    "###);
    assert_eq!(trace.transitions()[0].edges.len(), 2);
    assert_eq!(trace.transitions()[2].edges[0].to, "done");
    assert_eq!(
        trace.to_timed_actions(),
        TimedActions::new(
            ["send", "ack", "done"],
            Some(vec![0, 2, 7]),
            Some(vec![5, 10, -1])
        )?
    );
    let focused = vec!["ack".to_string()];
    assert_eq!(trace.focus(Some(&focused)).actions(), vec!["ack"]);
    Ok(())
}

#[test]
fn test_clock_choice() -> Result<()> {
    let text = fs::read_to_string("tests/fixtures/send_ack.txt")?;
    // `x` is only constrained relative to the reference clock
    let trace = parse_witness(&text, TraceFormat::Xtr, "x")?;
    assert_eq!(trace.actions(), vec!["send", "ack", "done"]);
    assert!(trace.transitions().iter().all(|t| t.interval.lower == 0));
    Ok(())
}

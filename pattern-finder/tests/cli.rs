// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Run the pattern-finder binary against a shell stand-in for `verifyta`.
//!
//! The stand-in reads candidate patterns from `<!-- cand: ... -->` comments
//! of its model, skips those the model carries a monitor for
//! (`// pattern: ...`), and answers with the `-t`-th remaining one, writing
//! an XML witness where the `j`-th action happens with the clock in
//! `[2j, 2j+1]`. A model marked `<!-- error -->` is a syntax error.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use eyre::Result;

const FAKE_VERIFYTA: &str = r#"#!/bin/sh
if [ "$1" = "-h" ]; then
  echo "  -h [ --help ]   Print this help message."
  exit 0
fi
kind=0
prefix=""
while [ $# -gt 2 ]; do
  case "$1" in
    -t) kind="$2"; shift 2;;
    -X) prefix="$2"; shift 2;;
    *) shift;;
  esac
done
model="$1"
if grep -qF '<!-- error -->' "$model"; then
  echo "$model:1: [error] syntax error, unexpected T_ID." >&2
  exit 1
fi
candidates=$(sed -n 's/^<!-- cand: \(.*\) -->$/\1/p' "$model")
count=0
chosen=""
while IFS= read -r line; do
  [ -z "$line" ] && continue
  grep -qF "// pattern: $line</declaration>" "$model" && continue
  if [ $count -le $kind ]; then
    chosen="$line"
  fi
  count=$((count + 1))
done <<END
$candidates
END
if [ -z "$chosen" ]; then
  echo " -- Formula is NOT satisfied."
  exit 0
fi
{
  echo "<trace>"
  echo "  <clock id=\"c0\" name=\"t(0)\"/>"
  echo "  <clock id=\"c1\" name=\"monitor_clk\"/>"
  echo "  <location id=\"P.l0\" name=\"l0\"/>"
  echo "  <node id=\"s0\"/>"
  i=0
  for a in $chosen; do
    j=$((i + 1))
    echo "  <location id=\"P.l$j\" name=\"l$j\"/>"
    echo "  <edge id=\"P.e$j\" from=\"P.l$i\" to=\"P.l$j\" sync=\"$a!\"/>"
    echo "  <dbm_instance id=\"d$j\"><clockbound clock1=\"c0\" clock2=\"c1\" bound=\"-$((2 * j))\" comp=\"&lt;=\"/><clockbound clock1=\"c1\" clock2=\"c0\" bound=\"$((2 * j + 1))\" comp=\"&lt;=\"/></dbm_instance>"
    echo "  <node id=\"s$j\" dbm_instance=\"d$j\"/>"
    echo "  <transition from=\"s$i\" to=\"s$j\" edges=\"P.e$j\"/>"
    i=$j
  done
  echo "</trace>"
} > "$prefix-1.xml"
echo " -- Formula is satisfied."
"#;

/// A model with one candidate pattern per line of `candidates`.
fn uppaal_model(candidates: &str, markers: &[&str]) -> String {
    let mut text =
        String::from("<nta>\n<declaration>broadcast chan go, a, b, c, d;</declaration>\n");
    for marker in markers {
        text.push_str(&format!("<!-- {marker} -->\n"));
    }
    for line in candidates.lines() {
        text.push_str(&format!("<!-- cand: {line} -->\n"));
    }
    text.push_str("<template><name>P</name></template>\n<system>system P;</system>\n</nta>\n");
    text
}

struct Setup {
    dir: tempfile::TempDir,
    verifyta: PathBuf,
}

impl Setup {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let verifyta = dir.path().join("verifyta");
        fs::write(&verifyta, FAKE_VERIFYTA)?;
        fs::set_permissions(&verifyta, fs::Permissions::from_mode(0o755))?;
        Ok(Self { dir, verifyta })
    }

    fn file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let out = Command::new(env!("CARGO_BIN_EXE_pattern-finder"))
            .arg("--verifyta")
            .arg(&self.verifyta)
            .args(args)
            .output()?;
        Ok(out)
    }
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temporary paths are UTF-8")
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../tracer/tests/fixtures")
        .join(name)
}

#[test]
fn test_trace() -> Result<()> {
    let s = Setup::new()?;
    let model = s.file("model.xml", &uppaal_model("", &[]))?;
    let out = s.run(&[
        "trace",
        path_str(&model),
        path_str(&fixture("send_ack.xml")),
        "--focus",
        "ack",
    ])?;
    assert!(out.status.success(), "{out:?}");
    assert_eq!(stdout(&out).trim(), "0: ack monitor_clk[2,10]");
    Ok(())
}

#[test]
fn test_find_json() -> Result<()> {
    let s = Setup::new()?;
    let model = s.file("model.xml", &uppaal_model("a b c\na c\nb\n", &[]))?;
    let out = s.run(&[
        "find",
        path_str(&model),
        "--input",
        "go:0:5",
        "--observe",
        "c",
        "--json",
    ])?;
    assert!(out.status.success(), "{out:?}");
    let found: serde_json::Value = serde_json::from_str(stdout(&out).trim())?;
    assert_eq!(found["query"], "E<> PatternInput.done && PatternObserver.pass");
    assert_eq!(found["pattern"]["actions"], serde_json::json!(["a", "c"]));
    assert_eq!(found["pattern"]["lb"], serde_json::json!([2, 4]));
    Ok(())
}

#[test]
fn test_find_all_json_lines() -> Result<()> {
    let s = Setup::new()?;
    let model = s.file("model.xml", &uppaal_model("a b c\na c\nb\nc a\nd\n", &[]))?;
    let out = s.run(&[
        "find-all",
        path_str(&model),
        "--observe",
        "c",
        "--max-patterns",
        "4",
        "--parallel",
        "process",
        "--json",
    ])?;
    assert!(out.status.success(), "{out:?}");
    let lines: Vec<serde_json::Value> = stdout(&out)
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    let patterns: Vec<_> = lines.iter().map(|l| l["pattern"]["actions"].clone()).collect();
    assert_eq!(
        lines[3]["query"],
        "E<> PatternObserver.pass && !PatternMonitor0.pass && !PatternMonitor1.pass \
         && !PatternMonitor2.pass"
    );
    assert_eq!(
        patterns,
        vec![
            serde_json::json!(["a", "b", "c"]),
            serde_json::json!(["a", "c"]),
            serde_json::json!(["b"]),
            serde_json::json!(["c", "a"]),
        ]
    );
    Ok(())
}

#[test]
fn test_find_nothing_fails() -> Result<()> {
    let s = Setup::new()?;
    let model = s.file("model.xml", &uppaal_model("", &[]))?;
    let out = s.run(&["find-query", path_str(&model), "--query", "E<> done"])?;
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("E<> done"));
    Ok(())
}

#[test]
fn test_bad_verifier_path() -> Result<()> {
    let out = Command::new(env!("CARGO_BIN_EXE_pattern-finder"))
        .args(["--verifyta", "/nonexistent/verifyta", "run", "--", "-h"])
        .output()?;
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    Ok(())
}

#[test]
fn test_run_many_reports_failures() -> Result<()> {
    let s = Setup::new()?;
    let model = s.file("broken.xml", &uppaal_model("a", &["error"]))?;
    let query = s.file("broken.q", "E<> done\n")?;
    let broken = format!("{} {}", model.display(), query.display());
    let out = s.run(&["run-many", "--parallel", "thread", "--", "-h", broken.as_str()])?;
    assert_eq!(out.status.code(), Some(1));
    let table = stdout(&out);
    assert!(table.contains("ok"), "{table}");
    assert!(table.contains("exit 1"), "{table}");
    Ok(())
}

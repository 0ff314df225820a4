// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Construct launch configurations for `verifyta` and its companion tools.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::proc::{self, VerifierError};

/// Text that `verifyta -h` must print for a path to be accepted.
pub const HELP_MARKER: &str = "-h [ --help ]";

/// Environment variable that makes `verifyta` print the compiled model
/// instead of checking it.
pub const COMPILE_ONLY_VAR: &str = "UPPAAL_COMPILE_ONLY";

/// The full invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierCmd {
    /// Binary to launch
    pub cmd: String,
    /// Arguments to pass
    pub args: Vec<String>,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
}

impl VerifierCmd {
    /// A command running `cmd` with no arguments.
    pub fn new<S: AsRef<OsStr>>(cmd: S) -> Self {
        Self {
            cmd: cmd.as_ref().to_string_lossy().to_string(),
            args: vec![],
            env: vec![],
        }
    }

    /// Append an argument.
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_string_lossy().to_string());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().to_string()),
        );
        self
    }

    /// Set an environment variable for the child.
    pub fn env<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, val: V) -> &mut Self {
        self.env
            .push((key.as_ref().to_string(), val.as_ref().to_string()));
        self
    }

    /// Build the command line string, for printing purposes.
    pub fn cmdline(&self) -> String {
        let mut cmdline: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        cmdline.push(quote(&self.cmd));
        cmdline.extend(self.args.iter().map(|a| quote(a)));
        cmdline.join(" ")
    }
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains([' ', '"']) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Split a command string into words. Double quotes group words, and a
/// backslash escapes the next character.
pub fn split_words(s: &str) -> Result<Vec<String>, VerifierError> {
    let mut words = vec![];
    let mut word: Option<String> = None;
    let mut in_quotes = false;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => word.get_or_insert_with(String::new).push(escaped),
                None => {
                    return Err(VerifierError::BadCommand(format!(
                        "trailing backslash in {s:?}"
                    )))
                }
            },
            '"' => {
                in_quotes = !in_quotes;
                word.get_or_insert_with(String::new);
            }
            c if c.is_whitespace() && !in_quotes => {
                if let Some(w) = word.take() {
                    words.push(w);
                }
            }
            c => word.get_or_insert_with(String::new).push(c),
        }
    }
    if in_quotes {
        return Err(VerifierError::BadCommand(format!("unbalanced quotes in {s:?}")));
    }
    words.extend(word);
    Ok(words)
}

/// Which file format `verifyta` writes witnesses in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceFormat {
    /// Compact `.xtr` traces, readable only through the compiled model
    Xtr,
    /// Verbose `.xml` traces
    Xml,
}

impl TraceFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(OsStr::to_str) {
            Some("xtr") => Some(Self::Xtr),
            Some("xml") => Some(Self::Xml),
            _ => None,
        }
    }

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xtr => "xtr",
            Self::Xml => "xml",
        }
    }

    /// `verifyta` flag taking the trace file prefix.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Xtr => "-f",
            Self::Xml => "-X",
        }
    }

    /// The file `verifyta` writes the witness of the first query to, given
    /// the prefix passed with [`TraceFormat::flag`].
    pub fn witness_path(&self, prefix: &Path) -> PathBuf {
        let mut name = prefix.as_os_str().to_owned();
        name.push(format!("-1.{}", self.extension()));
        PathBuf::from(name)
    }
}

/// Which witness `verifyta` reports (`-t`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticTrace {
    /// Any witness
    Some,
    /// Shortest in number of transitions
    Shortest,
    /// Fastest in time
    Fastest,
}

impl DiagnosticTrace {
    /// All kinds, in `-t` order.
    pub const ALL: [DiagnosticTrace; 3] = [Self::Some, Self::Shortest, Self::Fastest];

    /// Value of the `-t` argument.
    pub fn flag_value(&self) -> &'static str {
        match self {
            Self::Some => "0",
            Self::Shortest => "1",
            Self::Fastest => "2",
        }
    }
}

/// Wrapper around everything needed to launch `verifyta`. Built once with
/// [`VerifierConf::new`], which checks the binary, and read-only afterward.
#[derive(Debug, Clone)]
pub struct VerifierConf {
    verifyta: PathBuf,
    tracer: PathBuf,
    timeout: Option<Duration>,
    trace_format: TraceFormat,
}

impl VerifierConf {
    /// Create a configuration for the `verifyta` at `path`, checking that it
    /// runs and prints the expected help text.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, VerifierError> {
        let path = path.as_ref();
        validate_verifier_path(path)?;
        let tracer = path.with_file_name("tracer");
        log::debug!("using verifyta at {}", path.display());
        Ok(Self {
            verifyta: path.to_path_buf(),
            tracer,
            timeout: None,
            trace_format: TraceFormat::Xml,
        })
    }

    /// Set the per-command timeout. None waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different `tracer` binary (by default, the one next to
    /// `verifyta`).
    pub fn with_tracer<P: AsRef<Path>>(mut self, tracer: P) -> Self {
        self.tracer = tracer.as_ref().to_path_buf();
        self
    }

    /// Set the format witnesses are requested in.
    pub fn with_trace_format(mut self, format: TraceFormat) -> Self {
        self.trace_format = format;
        self
    }

    /// Path to `verifyta`.
    pub fn verifyta(&self) -> &Path {
        &self.verifyta
    }

    /// Path to `tracer`.
    pub fn tracer(&self) -> &Path {
        &self.tracer
    }

    /// Per-command timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Format witnesses are requested in.
    pub fn trace_format(&self) -> TraceFormat {
        self.trace_format
    }

    /// A `verifyta` invocation with the given arguments.
    pub fn command<I, S>(&self, args: I) -> VerifierCmd
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = VerifierCmd::new(&self.verifyta);
        cmd.args(args);
        cmd
    }

    /// A `verifyta` invocation printing the compiled form of `model`.
    pub fn compile_command(&self, model: &Path) -> VerifierCmd {
        let mut cmd = self.command([model]);
        cmd.env(COMPILE_ONLY_VAR, "1");
        cmd
    }

    /// A `tracer` invocation rendering an `.xtr` witness readable, given the
    /// compiled model.
    pub fn tracer_command(&self, compiled: &Path, trace: &Path) -> VerifierCmd {
        let mut cmd = VerifierCmd::new(&self.tracer);
        cmd.arg(compiled).arg(trace);
        cmd
    }
}

const VALIDATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Check that `path` is a working `verifyta` by running `path -h`.
pub fn validate_verifier_path(path: &Path) -> Result<(), VerifierError> {
    let invalid = |reason: String| VerifierError::InvalidVerifierPath {
        path: path.to_path_buf(),
        reason,
    };
    let mut cmd = VerifierCmd::new(path);
    cmd.arg("-h");
    let out = proc::run(&cmd, Some(VALIDATE_TIMEOUT)).map_err(|err| invalid(err.to_string()))?;
    if out.stdout.contains(HELP_MARKER) || out.stderr.contains(HELP_MARKER) {
        Ok(())
    } else {
        Err(invalid(format!("`-h` output does not mention {HELP_MARKER}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words(r#"-t 1 -f "my trace" model.xml"#).unwrap(),
            vec!["-t", "1", "-f", "my trace", "model.xml"]
        );
        assert_eq!(split_words("  a\\ b  c ").unwrap(), vec!["a b", "c"]);
        assert_eq!(split_words(r#"x """#).unwrap(), vec!["x", ""]);
        assert!(split_words("").unwrap().is_empty());
        assert!(matches!(
            split_words(r#"-f "oops"#),
            Err(VerifierError::BadCommand(_))
        ));
    }

    #[test]
    fn test_cmdline() {
        let mut cmd = VerifierCmd::new("/opt/uppaal/bin/verifyta");
        cmd.env(COMPILE_ONLY_VAR, "1")
            .args(["-t", "1"])
            .arg("my model.xml");
        insta::assert_display_snapshot!(
            cmd.cmdline(),
            @r###"UPPAAL_COMPILE_ONLY=1 /opt/uppaal/bin/verifyta -t 1 "my model.xml""###
        );
    }

    #[test]
    fn test_trace_format() {
        assert_eq!(
            TraceFormat::from_path(Path::new("out/t.xtr")),
            Some(TraceFormat::Xtr)
        );
        assert_eq!(
            TraceFormat::from_path(Path::new("t.xml")),
            Some(TraceFormat::Xml)
        );
        assert_eq!(TraceFormat::from_path(Path::new("t.txt")), None);
        assert_eq!(
            TraceFormat::Xtr.witness_path(Path::new("out/trace")),
            PathBuf::from("out/trace-1.xtr")
        );
    }

    #[test]
    fn test_missing_verifier() {
        let err = VerifierConf::new("/nonexistent/verifyta").unwrap_err();
        assert!(
            matches!(err, VerifierError::InvalidVerifierPath { .. }),
            "unexpected error {err}"
        );
    }

    #[test]
    fn test_wrong_help_text() {
        // `true` runs fine but prints nothing
        let err = VerifierConf::new("/bin/true").unwrap_err();
        assert!(matches!(err, VerifierError::InvalidVerifierPath { .. }));
    }
}
